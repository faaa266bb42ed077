use crate::cli::output::{print_outcome, print_stages};
use crate::cli::SourceArgs;
use anyhow::Result;
use clap::Args;
use reconflow::status::MetadataFileSink;
use reconflow::{Orchestrator, RunConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Log the commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Thread count passed to the reconstruction tool
    #[arg(long)]
    pub threads: Option<u32>,

    /// Always request high-field processing
    #[arg(long = "three-t")]
    pub three_t: bool,

    /// Keep per-scan working directories
    #[arg(long)]
    pub keep_output: bool,

    /// Archive the working tree and remove it
    #[arg(long)]
    pub zip_output: bool,

    /// Override the output directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Flags only ever switch options on; absent flags keep the file's value.
    fn apply(&self, config: &mut RunConfig) {
        if self.dry_run {
            config.run.dry_run = true;
        }
        if let Some(threads) = self.threads {
            config.pipeline.threads = threads;
        }
        if self.three_t {
            config.pipeline.three_t = true;
        }
        if self.keep_output {
            config.run.keep_output = true;
        }
        if self.zip_output {
            config.run.zip_output = true;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
    }
}

pub fn run(args: RunArgs) -> Result<i32> {
    let (mut config, catalog) = args.source.load()?;
    args.apply(&mut config);
    info!(analysis = %config.analysis_id, output = %config.output_dir.display(), "Loaded configuration");

    let sink = MetadataFileSink::in_output_dir(&config.output_dir);
    let report = Orchestrator::new(config, &catalog)
        .with_sink(Box::new(sink))
        .run();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_stages(&report.stages);
        print_outcome(&report.outcome);
        println!(
            "{} (return code {})",
            if report.verdict.success { "Run succeeded" } else { "Run failed" },
            report.verdict.return_code
        );
    }

    Ok(report.verdict.return_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn flags_override_config() {
        let harness = Harness::parse_from([
            "reconflow",
            "--catalog",
            "c.json",
            "--dry-run",
            "--threads",
            "8",
            "--three-t",
            "--output-dir",
            "/tmp/out",
        ]);
        let mut config = RunConfig::default();
        config.run.zip_output = true;
        harness.args.apply(&mut config);

        assert!(config.run.dry_run);
        assert_eq!(config.pipeline.threads, 8);
        assert!(config.pipeline.three_t);
        assert!(config.run.zip_output);
        assert!(!config.run.keep_output);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }
}
