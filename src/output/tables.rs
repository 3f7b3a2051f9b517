use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::jenkins::BuildResult;
use crate::report::format::format_optional_duration;
use crate::report::FailureCategory;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn result_cell(result: &BuildResult) -> Cell {
    let cell = Cell::new(result.as_str());
    match result {
        BuildResult::Success => cell.fg(TableColor::Green),
        BuildResult::InProgress => cell.fg(TableColor::Yellow),
        BuildResult::Failure => cell.fg(TableColor::Red),
        BuildResult::Other(_) => cell.fg(TableColor::Magenta),
    }
}

/// Code failures are ours to fix; the rest point at the infrastructure.
pub fn category_cell(category: Option<&FailureCategory>) -> Cell {
    match category {
        None => Cell::new("-").fg(TableColor::DarkGrey),
        Some(category @ FailureCategory::Code) => Cell::new(category).fg(TableColor::Red),
        Some(category @ FailureCategory::Unknown) => Cell::new(category).fg(TableColor::DarkGrey),
        Some(category) => Cell::new(category).fg(TableColor::Yellow),
    }
}

/// Durations over `warn_after` seconds are yellow.
pub fn duration_cell(seconds: Option<f64>, warn_after: f64) -> Cell {
    let cell = Cell::new(format_optional_duration(seconds));
    match seconds {
        None => cell.fg(TableColor::DarkGrey),
        Some(seconds) if seconds > warn_after => cell.fg(TableColor::Yellow),
        Some(_) => cell,
    }
}
