//! Terminal output for CLI commands.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use reconflow::selection::ScanRecord;
use reconflow::stage::{StageResult, StageState};
use reconflow::RunOutcome;

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print a table with an optional color per cell.
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Field strength in Tesla with one decimal, or `-`.
pub fn format_field(reading: Option<f64>) -> String {
    match reading {
        Some(r) => format!("{:.1}", reconflow::options::normalize_tesla(r)),
        None => "-".to_string(),
    }
}

pub fn print_scans(records: &[ScanRecord]) {
    if records.is_empty() {
        println!("No scans selected.");
        return;
    }
    let rows = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            vec![
                (i + 1).to_string(),
                r.stable_id.to_string(),
                r.session_label.clone(),
                r.acquisition_label.clone(),
                r.original_name.clone(),
                r.created_label(),
                format_field(r.field_strength),
                r.local_path.display().to_string(),
            ]
        })
        .collect();
    print_table(
        &["#", "Scan ID", "Session", "Acquisition", "File", "Created", "Field (T)", "Local path"],
        rows,
    );
}

fn state_color(state: StageState) -> Option<Color> {
    match state {
        StageState::Succeeded => Some(Color::Green),
        StageState::Failed => Some(Color::Red),
        StageState::Skipped => Some(Color::Yellow),
        StageState::Pending | StageState::Running => None,
    }
}

pub fn print_stages(stages: &[StageResult]) {
    if stages.is_empty() {
        println!("No stages ran.");
        return;
    }
    let rows = stages
        .iter()
        .map(|s| {
            vec![
                (s.stage_name.clone(), None),
                (s.state.to_string(), state_color(s.state)),
                (s.exit_code.to_string(), None),
                (s.status.to_string(), None),
            ]
        })
        .collect();
    print_table_colored(&["Stage", "State", "Exit", "Status"], rows);
}

/// Warnings then errors, as collected during the run.
pub fn print_outcome(outcome: &RunOutcome) {
    let rendered = outcome.render();
    if !rendered.is_empty() {
        eprint!("{}", rendered);
    }
}
