//! One subject, start to finish.
//!
//! Steps run in a fixed order against a single [`RunContext`]. Failures are
//! collected rather than raised: validation and selection failures stop
//! stage execution, stage failures do not stop later stages, and the verdict
//! is computed once at the end.

use crate::catalog::{RunLevel, ScanCatalog};
use crate::command::{CommandBuilder, StageCommand};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::OrchestrationError;
use crate::exec::{ProcessExecutor, StageExecutor};
use crate::filter::{resolve_rules, CompiledRules, RuleFragment};
use crate::license::{install_license, license_path};
use crate::naming::ScanId;
use crate::options::PipelineOptions;
use crate::outcome::{aggregate, Diagnostic, FailureKind, RunOutcome, Verdict};
use crate::prepare::{child_environment, link_averages};
use crate::retention::{archive_name, finalize, RetentionPolicy, RetentionReport};
use crate::selection::{self, ScanRecord, SelectionRequest};
use crate::stage::{RunMode, StageResult, StageRunner};
use crate::status::{LogSink, StatusSink, StatusTracker};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

pub const RESULT_KEY: &str = "result";

/// Scans and the commands that would run over them.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub subject_code: String,
    pub records: Vec<ScanRecord>,
    pub options: PipelineOptions,
    pub stages: Vec<StageCommand>,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub subject_code: String,
    pub records: Vec<ScanRecord>,
    pub stages: Vec<StageResult>,
    pub outcome: RunOutcome,
    pub verdict: Verdict,
    #[serde(skip)]
    pub retention: Option<RetentionReport>,
}

pub struct Orchestrator<'a> {
    config: RunConfig,
    catalog: &'a dyn ScanCatalog,
    executor: Option<Box<dyn StageExecutor + 'a>>,
    tracker: StatusTracker,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: RunConfig, catalog: &'a dyn ScanCatalog) -> Self {
        Self {
            config,
            catalog,
            executor: None,
            tracker: StatusTracker::new(Box::new(LogSink)),
        }
    }

    /// Run stages through `executor` instead of spawning processes.
    pub fn with_executor(mut self, executor: Box<dyn StageExecutor + 'a>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn StatusSink>) -> Self {
        self.tracker = StatusTracker::new(sink);
        self
    }

    /// Rule resolution and scan selection only.
    pub fn select(self) -> (Vec<ScanRecord>, RunOutcome) {
        let mut ctx = RunContext::new(self.config, self.catalog);
        if let Some(rules) = check_inputs(&mut ctx) {
            select_scans(&mut ctx, &rules);
        }
        (ctx.records, ctx.outcome)
    }

    /// Everything up to, not including, execution.
    pub fn plan(self) -> PlanReport {
        let mut ctx = RunContext::new(self.config, self.catalog);
        let (options, stages) = match check_inputs(&mut ctx) {
            Some(rules) => {
                select_scans(&mut ctx, &rules);
                build_plan(&ctx)
            }
            None => (PipelineOptions::default(), Vec::new()),
        };
        PlanReport {
            subject_code: ctx.subject_code,
            records: ctx.records,
            options,
            stages,
            outcome: ctx.outcome,
        }
    }

    pub fn run(self) -> RunReport {
        let Orchestrator {
            config,
            catalog,
            executor,
            mut tracker,
        } = self;
        let mut ctx = RunContext::new(config, catalog);
        tracker.publish(RESULT_KEY, "running");

        info!(
            project = %ctx.project_label_safe,
            subject = %ctx.subject_code,
            analysis = %ctx.config.analysis_id,
            dry_run = ctx.is_dry_run(),
            "Starting run"
        );

        let rules = check_inputs(&mut ctx);
        if !ctx.outcome.has_errors() && !ctx.is_dry_run() {
            install_license_step(&mut ctx);
        }
        if let Some(rules) = rules {
            if !ctx.outcome.has_errors() {
                select_scans(&mut ctx, &rules);
            }
        }
        let (_, stages) = if ctx.outcome.has_errors() {
            (PipelineOptions::default(), Vec::new())
        } else {
            build_plan(&ctx)
        };

        let mut retention = None;
        if ctx.outcome.has_errors() {
            info!("Command was NOT run because of previous errors.");
        } else if ctx.is_dry_run() {
            let note = "dry run is set: commands were NOT run";
            warn!("{}", note);
            ctx.outcome.warn(note);
            let mut executor = executor.unwrap_or_else(|| Box::new(ProcessExecutor::new()));
            let mode = RunMode::DryRun {
                exit_code: ctx.config.run.dry_run_exit_code,
            };
            let subjects_dir = ctx.layout.subjects_dir.clone();
            ctx.stages = StageRunner::new(mode, executor.as_mut(), &mut tracker, &subjects_dir)
                .run_all(&stages, &mut ctx.outcome);
        } else if let Some(env) = prepare_environment(&mut ctx) {
            let mut executor = executor.unwrap_or_else(|| {
                Box::new(
                    ProcessExecutor::new()
                        .with_cwd(&ctx.layout.subjects_dir)
                        .with_env(env),
                )
            });
            let subjects_dir = ctx.layout.subjects_dir.clone();
            ctx.stages = StageRunner::new(RunMode::Live, executor.as_mut(), &mut tracker, &subjects_dir)
                .run_all(&stages, &mut ctx.outcome);

            let policy = RetentionPolicy {
                keep_output: ctx.config.run.keep_output,
                zip_output: ctx.config.run.zip_output,
                archive_name: archive_name(
                    &ctx.config.gear_name,
                    &ctx.subject_code_safe,
                    &ctx.config.analysis_id,
                ),
            };
            retention = Some(finalize(&ctx.layout, &policy, &mut ctx.outcome));
        }

        let verdict = aggregate(&ctx.exit_codes(), &ctx.outcome);
        ctx.outcome.return_code = verdict.return_code;

        let rendered = ctx.outcome.render();
        if !rendered.is_empty() {
            info!("{}", rendered.trim_end());
        }
        info!(return_code = verdict.return_code, "Run finished");
        tracker.publish(RESULT_KEY, if verdict.success { "success" } else { "failure" });

        RunReport {
            subject_code: ctx.subject_code,
            records: ctx.records,
            stages: ctx.stages,
            outcome: ctx.outcome,
            verdict,
            retention,
        }
    }
}

/// Configuration, run level and filter rules. Returns the compiled rules
/// when they are usable.
fn check_inputs(ctx: &mut RunContext<'_>) -> Option<CompiledRules> {
    for problem in ctx.config.validate() {
        error!("{}", problem);
        ctx.outcome.error(OrchestrationError::Validation(problem));
    }

    let level = ctx.catalog.run_level();
    match level {
        RunLevel::Subject => {}
        RunLevel::Project | RunLevel::Session => {
            let msg = format!("reconflow must be run at the subject, not {} level", level);
            error!("{}", msg);
            ctx.outcome.error(OrchestrationError::Validation(msg));
        }
        RunLevel::Other => {
            let msg = "This job is not being run at the project, subject or session level";
            error!("{}", msg);
            ctx.outcome.error(OrchestrationError::Validation(msg.to_string()));
        }
    }

    let layers = [
        ctx.catalog
            .project()
            .map(|p| RuleFragment::from_metadata(&p.info))
            .unwrap_or_default(),
        ctx.catalog
            .subject()
            .map(|s| RuleFragment::from_metadata(&s.info))
            .unwrap_or_default(),
        ctx.config.filters.clone(),
    ];
    let rules = resolve_rules(&layers);
    if !rules.is_empty() {
        info!(?rules, "Active filter rules");
    }
    match rules.compile(ctx.config.pipeline.include_mode) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            error!(error = %e, "Invalid filter rule");
            ctx.outcome.error(OrchestrationError::Validation(e.to_string()));
            None
        }
    }
}

fn install_license_step(ctx: &mut RunContext<'_>) {
    let dest = license_path(&ctx.config.pipeline.freesurfer_home);
    if let Err(e) = install_license(&ctx.config, ctx.catalog.project(), &dest) {
        error!(error = %e, "License not installed");
        ctx.outcome.error(OrchestrationError::Validation(e.to_string()));
    }
}

/// Select scans into the context. Zero scans is fatal; one scan and
/// duplicate identifiers are warnings.
fn select_scans(ctx: &mut RunContext<'_>, rules: &CompiledRules) {
    info!(subject = %ctx.subject_code, "Downloading scans for subject");
    let request = SelectionRequest {
        rules,
        measurement_tags: &ctx.config.pipeline.measurement_tags,
        file_type: &ctx.config.pipeline.file_type,
        input_dir: &ctx.layout.input_dir,
        subject_code: &ctx.subject_code_safe,
    };

    let selection = match selection::select(ctx.catalog, &request) {
        Ok(selection) => selection,
        Err(e) => {
            error!(error = %e, "Scan selection failed");
            ctx.outcome.error(e);
            return;
        }
    };
    info!(
        downloaded = selection.downloaded,
        reused = selection.reused,
        "Scans ready"
    );

    match selection.records.len() {
        0 => {
            let msg = format!("no scans matched for subject '{}'", ctx.subject_code);
            error!("{}", msg);
            ctx.outcome.error(OrchestrationError::Selection(msg));
        }
        1 => {
            let msg = "only one scan selected; the longitudinal pipeline expects at least two";
            warn!("{}", msg);
            ctx.outcome.warn(msg);
        }
        _ => {}
    }

    let mut seen: HashSet<&ScanId> = HashSet::new();
    for record in &selection.records {
        if !seen.insert(&record.stable_id) {
            let msg = format!(
                "identifier {} is shared by more than one scan",
                record.stable_id
            );
            warn!("{}", msg);
            ctx.outcome
                .warn(Diagnostic::failure(FailureKind::PostProcessing, msg));
        }
    }

    for (index, record) in selection.records.iter().enumerate() {
        info!(
            index,
            scan_id = %record.stable_id,
            path = %record.local_path.display(),
            created = %record.created_label(),
            "Selected scan"
        );
    }
    ctx.records = selection.records;
}

fn build_plan(ctx: &RunContext<'_>) -> (PipelineOptions, Vec<StageCommand>) {
    if ctx.records.is_empty() {
        return (PipelineOptions::default(), Vec::new());
    }
    let base = PipelineOptions::new(ctx.config.pipeline.threads, ctx.config.pipeline.three_t);
    let options = PipelineOptions::resolve(base, ctx.records.iter().map(|r| r.field_strength));
    info!(
        threads = options.thread_count,
        high_field = options.high_field,
        "Pipeline options"
    );

    let builder = CommandBuilder::new(
        ctx.config.pipeline.command.clone(),
        &ctx.layout.subjects_dir,
        options,
    )
    .with_steps(&ctx.config.steps())
    .with_directives(&ctx.config.pipeline.directives);
    let stages = builder.plan(
        &ctx.records,
        &ctx.config.pipeline.parcellations,
        &ctx.config.pipeline.measurements,
    );
    (options, stages)
}

/// Working tree, reference links and child environment. Any failure is an
/// error and blocks execution.
fn prepare_environment(ctx: &mut RunContext<'_>) -> Option<Vec<(String, String)>> {
    let prepared = ctx.layout.create().and_then(|()| {
        link_averages(&ctx.config.pipeline.freesurfer_home, &ctx.layout.subjects_dir)?;
        child_environment(&ctx.config, &ctx.layout)
    });
    match prepared {
        Ok(env) => Some(env),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Environment preparation failed");
            ctx.outcome.error(format!("{:#}", e));
            info!("Command was NOT run because of previous errors.");
            None
        }
    }
}
