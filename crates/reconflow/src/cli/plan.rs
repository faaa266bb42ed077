use crate::cli::output::{print_outcome, print_table};
use crate::cli::{exit_code, SourceArgs};
use anyhow::Result;
use clap::Args;
use reconflow::Orchestrator;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: PlanArgs) -> Result<i32> {
    let (config, catalog) = args.source.load()?;
    let report = Orchestrator::new(config, &catalog).plan();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let rows = report
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| vec![(i + 1).to_string(), stage.kind.to_string(), stage.text.clone()])
            .collect();
        print_table(&["#", "Kind", "Command"], rows);
        println!(
            "Options: {} threads, high field {}",
            report.options.thread_count,
            if report.options.high_field { "on" } else { "off" }
        );
        print_outcome(&report.outcome);
    }

    Ok(exit_code(report.outcome.has_errors()))
}
