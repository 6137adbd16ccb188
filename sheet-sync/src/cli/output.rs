//! Human and JSON rendering of command results

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

use super::OutputFormat;
use crate::patch::{HeaderDescription, RecordResult, RecordStatus, SheetReport};
use crate::sync::SyncReport;

/// Serialize `value` for the JSON formats; None for text output
pub fn render_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    match format {
        OutputFormat::Text => Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(Some)
            .context("Failed to format JSON output"),
        OutputFormat::JsonCompact => serde_json::to_string(value)
            .map(Some)
            .context("Failed to format JSON output"),
    }
}

pub fn print_headers(description: &HeaderDescription, format: OutputFormat) -> Result<()> {
    if let Some(json) = render_json(description, format)? {
        println!("{}", json);
        return Ok(());
    }

    println!(
        "Sheet {}: header row {}",
        description.sheet.bright_cyan().bold(),
        description.header_row.to_string().bold()
    );
    for column in &description.columns {
        let marker = if column.column == description.key_column {
            " (key)".bright_green().to_string()
        } else {
            String::new()
        };
        println!("  {:>3}  {}{}", column.letter.dimmed(), column.name, marker);
    }
    Ok(())
}

#[derive(Serialize)]
struct Preview<'a> {
    sheet: &'a str,
    rows: &'a [Vec<String>],
}

pub fn print_preview(sheet: &str, rows: &[Vec<String>], format: OutputFormat) -> Result<()> {
    if let Some(json) = render_json(&Preview { sheet, rows }, format)? {
        println!("{}", json);
        return Ok(());
    }

    println!("Sheet {}", sheet.bright_cyan().bold());
    for (i, row) in rows.iter().enumerate() {
        println!("{:>4}  {}", (i + 1).to_string().dimmed(), row.join("\t"));
    }
    Ok(())
}

pub fn print_sync_report(report: &SyncReport<Vec<SheetReport>>, format: OutputFormat) -> Result<()> {
    if let Some(json) = render_json(report, format)? {
        println!("{}", json);
        return Ok(());
    }

    for sheet in &report.outcome {
        print_sheet_report(sheet);
    }

    let (matched, total) = count_matched(&report.outcome);
    let summary = format!("{}/{} record(s) patched", matched, total);
    let summary = if matched == total {
        summary.bright_green()
    } else {
        summary.yellow()
    };
    println!();
    println!("{}", summary.bold());

    if !report.changed {
        println!("{}", "No cells changed; nothing published".dimmed());
    } else if report.dry_run {
        println!("{}", "Dry run: nothing published".yellow());
    } else if let Some(id) = &report.published_id {
        if let Some(path) = &report.local_copy {
            println!("Working copy: {}", path.display().to_string().bright_green());
        }
        let verb = if report.created { "Created" } else { "Updated" };
        println!("{} remote file {}", verb, id.bright_green());
    }
    Ok(())
}

fn print_sheet_report(sheet: &SheetReport) {
    match (&sheet.error, sheet.header_row) {
        (Some(error), _) => {
            println!("{} {}", "✗".red().bold(), error.to_string().red());
            return;
        }
        (None, Some(row)) => println!(
            "Sheet {} (header row {})",
            sheet.sheet.bright_cyan().bold(),
            row
        ),
        (None, None) => println!("Sheet {}", sheet.sheet.bright_cyan().bold()),
    }
    for record in &sheet.records {
        println!("  {}", record_line(record));
    }
}

fn record_line(record: &RecordResult) -> String {
    let mut line = match record.status {
        RecordStatus::Patched => format!("{} {}", "✓".green(), record.key.bold()),
        RecordStatus::FieldsSkipped => format!("{} {}", "!".yellow(), record.key.bold()),
        _ => format!("{} {}", "✗".red(), record.key.bold()),
    };
    match record.row {
        Some(row) => line.push_str(&format!(" row {}", row)),
        None => line.push_str(&format!(" {}", record.status.to_string().red())),
    }
    if !record.applied.is_empty() {
        line.push_str(&format!("  applied: {}", record.applied.join(", ")));
    }
    if !record.skipped.is_empty() {
        line.push_str(&format!("  skipped: {}", record.skipped.join(", ").yellow()));
    }
    line
}

/// (records matched, records total) across sheets
pub fn count_matched(reports: &[SheetReport]) -> (usize, usize) {
    reports.iter().fold((0, 0), |(matched, total), sheet| {
        (matched + sheet.matched_count(), total + sheet.records.len())
    })
}
