use std::fmt::Write;

use comfy_table::Cell;

use crate::report::format::format_optional_duration;
use crate::report::{PipelineReport, StageReport};

use super::styling::{bright, bright_yellow, cyan, dim, styled_result};
use super::tables::{category_cell, create_cyan_header, create_table, duration_cell, result_cell};

/// Queue and retry delays above this many seconds are highlighted.
const SLOW_DELAY_SECS: f64 = 600.0;

/// Prints a human-readable summary of each pipeline report to stdout.
///
/// For every pipeline:
/// - Overview: result, start, durations, change and failure cause
/// - Stages: one row per stage with timing and failure category
/// - Failing runs: every failed matrix run with its cause
pub fn print_summary(reports: &[(String, PipelineReport)]) {
    println!("{}", render_summary(reports));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn add_field(output: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "  {} {value}", dim(format!("{label}:")));
}

fn render_summary(reports: &[(String, PipelineReport)]) -> String {
    let mut output = String::new();
    if reports.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No pipelines found."));
        return output;
    }
    for (url, report) in reports {
        render_pipeline(&mut output, url, report);
    }
    output
}

fn render_pipeline(output: &mut String, url: &str, report: &PipelineReport) {
    add_section_header(output, "📊", "Pipeline");
    add_field(output, "URL", cyan(url));
    add_field(output, "Result", styled_result(&report.result));
    if let Some(timestamp) = report.timestamp {
        add_field(output, "Started", dim(timestamp.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(user) = &report.triggered_by {
        add_field(output, "Triggered by", user);
    }
    add_field(
        output,
        "Duration",
        format!(
            "{} {}",
            format_optional_duration(report.duration),
            dim(format!(
                "(active {}, queued {}, retry delays {})",
                format_optional_duration(report.active_duration),
                format_optional_duration(report.queue_delays),
                format_optional_duration(report.retry_delays),
            ))
        ),
    );
    if !report.change.is_empty() {
        let change = [
            ("project", &report.change.project),
            ("version", &report.change.version),
            ("commit", &report.change.git_commit),
        ]
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|value| format!("{name} {value}")))
        .collect::<Vec<_>>()
        .join(", ");
        add_field(output, "Change", change);
    }
    if let Some(cause) = &report.failure_cause {
        let category = report
            .failure_category
            .as_ref()
            .map_or_else(String::new, |category| format!("[{category}] "));
        add_field(output, "Failure", bright_yellow(format!("{category}{cause}")));
    }
    if report.successful_logs_analyzed == Some(false) {
        add_field(output, "Note", dim("successful logs were not analyzed"));
    }
    output.push('\n');

    render_stages(output, report);
    render_failing_runs(output, report);
}

fn render_stages(output: &mut String, report: &PipelineReport) {
    add_section_header(output, "🧱", "Stages");

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Stage", "Result", "Duration", "Queued", "Retries", "Category", "Cause",
    ]));
    for (name, stage) in &report.stages {
        table.add_row(vec![
            Cell::new(name),
            result_cell(&stage.result),
            duration_cell(stage.duration, f64::INFINITY),
            duration_cell(stage.queue_delay, SLOW_DELAY_SECS),
            Cell::new(stage.retries.map_or_else(|| "-".to_string(), |r| r.to_string())),
            category_cell(stage.failure_category.as_ref()),
            Cell::new(stage.failure_cause.as_deref().unwrap_or("")),
        ]);
    }
    let _ = writeln!(output, "{table}\n");
}

fn failing_runs(report: &PipelineReport) -> Vec<(&str, &str, &StageReport)> {
    report
        .stages
        .iter()
        .flat_map(|(stage, stage_report)| {
            stage_report
                .runs()
                .filter(|(_, run)| run.result.is_failed())
                .map(move |(run_name, run)| (stage.as_str(), run_name.as_str(), run))
        })
        .collect()
}

fn render_failing_runs(output: &mut String, report: &PipelineReport) {
    let runs = failing_runs(report);
    if runs.is_empty() {
        return;
    }
    add_section_header(output, "❌", "Failing Runs");

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Stage", "Run", "Result", "Duration", "Category", "Cause",
    ]));
    for (stage, run_name, run) in runs {
        table.add_row(vec![
            Cell::new(stage),
            Cell::new(run_name),
            result_cell(&run.result),
            duration_cell(run.duration, f64::INFINITY),
            category_cell(run.failure_category.as_ref()),
            Cell::new(run.failure_cause.as_deref().unwrap_or("")),
        ]);
    }
    let _ = writeln!(output, "{table}\n");
}
