//! Subcommands of the `reconflow` binary.

pub mod output;
pub mod plan;
pub mod run;
pub mod select;

use anyhow::{Context, Result};
use clap::Args;
use reconflow::{ManifestCatalog, RunConfig};
use std::path::PathBuf;

/// Where the run configuration and the scan catalog come from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Run configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "RECONFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subject catalog manifest (JSON)
    #[arg(long)]
    pub catalog: PathBuf,
}

impl SourceArgs {
    pub fn load(&self) -> Result<(RunConfig, ManifestCatalog)> {
        let config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        let catalog = ManifestCatalog::open(&self.catalog)
            .with_context(|| format!("Failed to open catalog {}", self.catalog.display()))?;
        Ok((config, catalog))
    }
}

/// Exit code for commands that stop before execution.
pub fn exit_code(has_errors: bool) -> i32 {
    if has_errors {
        1
    } else {
        0
    }
}
