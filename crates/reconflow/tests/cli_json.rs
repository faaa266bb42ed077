#![cfg(unix)]

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn reconflow_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_reconflow"))
}

fn cli_command(args: &[String], home: &Path) -> Command {
    let mut cmd = Command::new(reconflow_bin());
    cmd.args(args)
        .env("RECONFLOW_HOME", home)
        .env_remove("RUST_LOG")
        .env_remove("RECONFLOW_CONFIG");
    cmd
}

fn run_cli(args: &[String], home: &Path) -> Output {
    cli_command(args, home)
        .output()
        .expect("failed to execute reconflow CLI")
}

fn parse_json_output(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn run_cli_json<T: DeserializeOwned>(args: &[String], home: &Path) -> T {
    let output = run_cli(args, home);
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_value(parse_json_output(&output)).unwrap_or_else(|err| {
        panic!(
            "failed to deserialize JSON output: {}\nstdout:\n{}",
            err,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[derive(Debug, Deserialize)]
struct SelectOutput {
    scans: Vec<ScanJson>,
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ScanJson {
    stable_id: String,
    visit_label: String,
    created: String,
    local_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PlanOutput {
    options: OptionsJson,
    stages: Vec<StageJson>,
}

#[derive(Debug, Deserialize)]
struct OptionsJson {
    thread_count: u32,
    high_field: bool,
}

#[derive(Debug, Deserialize)]
struct StageJson {
    kind: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct RunOutput {
    stages: Vec<RunStageJson>,
    verdict: VerdictJson,
}

#[derive(Debug, Deserialize)]
struct RunStageJson {
    state: String,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct RunRecordsOutput {
    records: Vec<RecordJson>,
    stages: Vec<RunStageJson>,
    verdict: VerdictJson,
}

#[derive(Debug, Deserialize)]
struct RecordJson {
    local_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VerdictJson {
    success: bool,
    return_code: i32,
}

/// Catalog with one T1 per session plus the config pointing into `dir`.
fn write_inputs(dir: &Path, run_level: &str, sessions: &[(&str, f64)]) -> (PathBuf, PathBuf) {
    fs::create_dir_all(dir.join("scans")).unwrap();
    let sessions: Vec<serde_json::Value> = sessions
        .iter()
        .enumerate()
        .map(|(i, (label, tesla))| {
            let source = format!("scans/{}.nii.gz", i);
            fs::write(dir.join(&source), b"nifti").unwrap();
            serde_json::json!({
                "id": format!("s{}", i),
                "label": label,
                "acquisitions": [{"id": format!("a{}", i), "label": "T1w", "files": [
                    {"name": "T1w.nii.gz", "type": "nifti",
                     "classification": {"Measurement": ["T1"]},
                     "info": {"MagneticFieldStrength": tesla},
                     "source": source}
                ]}]
            })
        })
        .collect();
    let catalog = dir.join("catalog.json");
    fs::write(
        &catalog,
        serde_json::json!({
            "run_level": run_level,
            "subject": {"code": "S01"},
            "sessions": sessions,
        })
        .to_string(),
    )
    .unwrap();

    let config = dir.join("reconflow.toml");
    fs::write(
        &config,
        format!(
            r#"analysis_id = "cli1"
output_dir = "{out}"
input_dir = "{input}"

[pipeline]
threads = 3

[filters]
session_exclude = "scout"
"#,
            out = dir.join("output").display(),
            input = dir.join("input").display(),
        ),
    )
    .unwrap();

    (config, catalog)
}

fn args(parts: &[&str], config: &Path, catalog: &Path) -> Vec<String> {
    let mut out: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
    out.push("--config".to_string());
    out.push(config.display().to_string());
    out.push("--catalog".to_string());
    out.push(catalog.display().to_string());
    out
}

#[test]
fn select_json_lists_scans_in_catalog_order() {
    let temp = TempDir::new().unwrap();
    let (config, catalog) = write_inputs(
        temp.path(),
        "subject",
        &[("Baseline", 3.0), ("scout run", 3.0), ("Follow up", 3.0)],
    );

    let output: SelectOutput =
        run_cli_json(&args(&["select", "--json"], &config, &catalog), temp.path());

    assert!(output.errors.is_empty());
    let ids: Vec<&str> = output.scans.iter().map(|s| s.stable_id.as_str()).collect();
    assert_eq!(ids, vec!["S01-Baseline", "S01-Follow_up"]);
    assert_eq!(output.scans[1].visit_label, "Follow_up");
    assert_eq!(output.scans[0].created, "unknown");
    assert!(output.scans.iter().all(|s| s.local_path.is_file()));
}

#[test]
fn plan_json_escalates_high_field() {
    let temp = TempDir::new().unwrap();
    let (config, catalog) =
        write_inputs(temp.path(), "subject", &[("v1", 1500.0), ("v2", 2900.0)]);

    let output: PlanOutput =
        run_cli_json(&args(&["plan", "--json"], &config, &catalog), temp.path());

    assert_eq!(output.options.thread_count, 3);
    assert!(output.options.high_field);
    let kinds: Vec<&str> = output.stages.iter().map(|s| s.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "cross-sectional",
            "cross-sectional",
            "template",
            "longitudinal",
            "longitudinal",
            "table-export"
        ]
    );
    assert!(output.stages[..5]
        .iter()
        .all(|s| s.text.ends_with("-openmp 3 -3T")));
}

#[test]
fn dry_run_json_succeeds_without_running() {
    let temp = TempDir::new().unwrap();
    let (config, catalog) = write_inputs(temp.path(), "subject", &[("v1", 3.0), ("v2", 3.0)]);

    let output: RunOutput = run_cli_json(
        &args(&["run", "--dry-run", "--json"], &config, &catalog),
        temp.path(),
    );

    assert!(output.verdict.success);
    assert_eq!(output.verdict.return_code, 0);
    assert_eq!(output.stages.len(), 6);
    assert!(output
        .stages
        .iter()
        .all(|s| s.state == "skipped" && s.exit_code == 0));
}

#[test]
fn session_level_run_exits_with_one() {
    let temp = TempDir::new().unwrap();
    let (config, catalog) = write_inputs(temp.path(), "session", &[("v1", 3.0)]);

    let output = run_cli(&args(&["run", "--dry-run"], &config, &catalog), temp.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("ValidationError: reconflow must be run at the subject, not session level"),
        "stderr:\n{}",
        stderr
    );
}

#[test]
fn missing_catalog_is_reported() {
    let temp = TempDir::new().unwrap();
    let output = run_cli(
        &[
            "select".to_string(),
            "--catalog".to_string(),
            temp.path().join("nope.json").display().to_string(),
        ],
        temp.path(),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to open catalog"));
}

/// Fails when `-sd` or `-i` do not name existing paths as seen from the
/// working directory the stage runs in. Writes non-UTF-8 bytes and a burst
/// of stderr like the real tool can.
const CHECKING_RECON_ALL: &str = r##"#!/bin/sh
dir=""
while [ $# -gt 0 ]; do
  case "$1" in
    -sd) [ -d "$2" ] || { echo "no subjects dir $2" >&2; exit 2; }; SUBJECTS_DIR="$2"; shift 2 ;;
    -i) [ -f "$2" ] || { echo "no input $2" >&2; exit 3; }; shift 2 ;;
    -s|-base) dir="$2"; shift 2 ;;
    -long) dir="$2.long.$3"; shift 3 ;;
    *) shift ;;
  esac
done
printf 'progress \377\376\n'
i=0
while [ $i -lt 5000 ]; do echo "stderr line $i" >&2; i=$((i+1)); done
mkdir -p "$SUBJECTS_DIR/$dir/scripts"
echo "#@# done $dir" >> "$SUBJECTS_DIR/$dir/scripts/recon-all-status.log"
"##;

const WRITE_TABLE: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --tablefile) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "Measure,value" > "$out"
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn live_run_with_relative_directories_succeeds() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let (_, catalog) = write_inputs(root, "subject", &[("v1", 3.0), ("v2", 3.0)]);

    let bin = root.join("bin");
    fs::create_dir_all(&bin).unwrap();
    write_script(&bin.join("recon-all"), CHECKING_RECON_ALL);
    write_script(&bin.join("asegstats2table"), WRITE_TABLE);
    write_script(&bin.join("aparcstats2table"), WRITE_TABLE);
    for name in ["fsaverage", "lh.EC_average", "rh.EC_average"] {
        fs::create_dir_all(root.join("fs/subjects").join(name)).unwrap();
    }
    fs::write(
        root.join("environ.json"),
        serde_json::json!({"PATH": format!("{}:/usr/bin:/bin", bin.display())}).to_string(),
    )
    .unwrap();

    // Every path in this config is relative to the directory reconflow starts in.
    fs::write(
        root.join("relative.toml"),
        r#"analysis_id = "rel1"
output_dir = "output"
input_dir = "input"

[pipeline]
freesurfer_home = "fs"
environment_file = "environ.json"

[run]
license = "someone@example.org 1 key"
"#,
    )
    .unwrap();

    let args = vec![
        "run".to_string(),
        "--json".to_string(),
        "--config".to_string(),
        "relative.toml".to_string(),
        "--catalog".to_string(),
        catalog.display().to_string(),
    ];
    let output = cli_command(&args, root)
        .current_dir(root)
        .output()
        .expect("failed to execute reconflow CLI");
    let report: RunRecordsOutput = serde_json::from_value(parse_json_output(&output)).unwrap();

    assert_eq!(
        report.verdict.return_code,
        0,
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(report.verdict.success);
    assert_eq!(report.stages.len(), 6);
    assert!(report
        .stages
        .iter()
        .all(|s| s.state == "succeeded" && s.exit_code == 0));
    assert!(report.records.iter().all(|r| r.local_path.is_absolute()));
    assert!(root.join("output/aseg_stats_vol.csv").is_file());
    assert!(root.join("fs/license.txt").is_file());
    assert_eq!(output.status.code(), Some(0));
}
