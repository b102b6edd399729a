//! Output formatting for CLI commands.
//!
//! Run summaries and validation reports are rendered as condensed tables
//! with a per-status color scheme: Published green, Skipped yellow,
//! Failed red.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use datapact_schema::{ValidationLevel, ValidationReport};

use crate::pipeline::{ContractOutcome, ContractStatus, RunSummary};

pub fn status_color(status: &ContractStatus) -> Color {
    match status {
        ContractStatus::Published { .. } => Color::Green,
        ContractStatus::Skipped { .. } => Color::Yellow,
        ContractStatus::Failed { .. } => Color::Red,
    }
}

pub fn level_color(level: ValidationLevel) -> Color {
    match level {
        ValidationLevel::Success => Color::Green,
        ValidationLevel::Warning => Color::Yellow,
        ValidationLevel::Error => Color::Red,
    }
}

/// One-line detail cell for an outcome: the status reason first, then any
/// surfaced warnings.
pub fn outcome_details(outcome: &ContractOutcome) -> String {
    let mut parts = Vec::new();
    match &outcome.status {
        ContractStatus::Published { refreshed: true } => parts.push("refreshed".to_string()),
        ContractStatus::Published { refreshed: false } => {
            parts.push("local data fresh".to_string())
        }
        ContractStatus::Skipped { reason } => parts.push(reason.clone()),
        ContractStatus::Failed { reason } => parts.push(reason.clone()),
    }
    parts.extend(outcome.warnings.iter().cloned());
    parts.join("; ")
}

pub fn print_run_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Contract").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Details").fg(Color::Cyan),
        ]);

    for outcome in &summary.outcomes {
        table.add_row(vec![
            Cell::new(&outcome.id),
            Cell::new(outcome.status.as_str()).fg(status_color(&outcome.status)),
            Cell::new(outcome_details(outcome)),
        ]);
    }

    println!("{}", table);
    println!(
        "{} published, {} skipped, {} failed",
        summary.published(),
        summary.skipped(),
        summary.failed()
    );
}

pub fn print_validation_report(report: &ValidationReport) {
    if report.issues.is_empty() {
        println!("Validation: {}", report.level.as_str());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Level").fg(Color::Cyan),
            Cell::new("Column").fg(Color::Cyan),
            Cell::new("Issue").fg(Color::Cyan),
        ]);

    for issue in &report.issues {
        table.add_row(vec![
            Cell::new(issue.level.as_str()).fg(level_color(issue.level)),
            Cell::new(issue.column.as_deref().unwrap_or("(dataset)")),
            Cell::new(&issue.message),
        ]);
    }

    println!("{}", table);
    println!("Validation: {}", report.level.as_str());
}
