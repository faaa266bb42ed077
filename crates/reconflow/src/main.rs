use clap::{Parser, Subcommand};
use reconflow_logging::LogConfig;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "reconflow",
    version,
    about = "Longitudinal reconstruction orchestrator for one subject"
)]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Select scans, run every stage, package the results
    Run(cli::run::RunArgs),

    /// Resolve filter rules and select scans (downloads included)
    Select(cli::select::SelectArgs),

    /// Print the commands a run would execute
    Plan(cli::plan::PlanArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = reconflow_logging::init_logging(LogConfig {
        app_name: "reconflow",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let result = match cli.command {
        Commands::Run(args) => cli::run::run(args),
        Commands::Select(args) => cli::select::run(args),
        Commands::Plan(args) => cli::plan::run(args),
    };

    match result {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
