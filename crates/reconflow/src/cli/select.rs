use crate::cli::output::{print_outcome, print_scans};
use crate::cli::{exit_code, SourceArgs};
use anyhow::Result;
use clap::Args;
use reconflow::Orchestrator;
use serde_json::json;

#[derive(Args, Debug)]
pub struct SelectArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: SelectArgs) -> Result<i32> {
    let (config, catalog) = args.source.load()?;
    let (records, outcome) = Orchestrator::new(config, &catalog).select();

    if args.json {
        let doc = json!({
            "scans": records,
            "errors": outcome.errors,
            "warnings": outcome.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_scans(&records);
        print_outcome(&outcome);
    }

    Ok(exit_code(outcome.has_errors()))
}
