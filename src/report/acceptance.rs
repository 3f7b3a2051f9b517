use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use super::types::AcceptanceTiming;

#[allow(clippy::expect_used)]
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CHEF-ACCEPTANCE::\[[^\]]+\]\s+\|(.+)\|\s*$").expect("constant regex pattern is valid")
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AcceptanceResults {
    /// One entry per table in the log.
    pub timing: Vec<AcceptanceTiming>,
    /// `suite::command` of every failed row except totals.
    pub failures: Vec<String>,
}

/// Reads every `chef-acceptance` summary table in the log:
///
/// ```text
/// CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | Suite   | Command   | Duration | Error |
/// CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | trivial | provision | 00:01:21 | N     |
/// CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | trivial | Total     | 00:01:58 | N     |
/// ```
pub fn extract_acceptance(lines: &[&str]) -> AcceptanceResults {
    let mut results = AcceptanceResults::default();
    for table in tables(lines) {
        let mut timing = AcceptanceTiming::new();
        for row in table {
            let field = |name: &str| row.get(name).map(String::as_str).unwrap_or_default();
            let (suite, command) = (field("suite"), field("command"));
            timing
                .entry(suite.to_string())
                .or_insert_with(IndexMap::new)
                .insert(command.to_string(), parse_duration(field("duration")));
            if field("error") == "Y" && command != "Total" {
                results.failures.push(format!("{suite}::{command}"));
            }
        }
        results.timing.push(timing);
    }
    results
}

type Row = IndexMap<String, String>;

/// Rows of every table, keyed by the lowercased header of the table.
fn tables(lines: &[&str]) -> Vec<Vec<Row>> {
    let mut tables = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut rows: Vec<Row> = Vec::new();

    for line in lines {
        let Some(captures) = TABLE_ROW.captures(line) else {
            if !rows.is_empty() {
                tables.push(std::mem::take(&mut rows));
            }
            header = None;
            continue;
        };
        let cells: Vec<String> = captures[1].split('|').map(|c| c.trim().to_string()).collect();
        match &header {
            Some(names) => rows.push(names.iter().cloned().zip(cells).collect()),
            None => header = Some(cells.iter().map(|c| c.to_lowercase()).collect()),
        }
    }
    if !rows.is_empty() {
        tables.push(rows);
    }
    tables
}

/// Parses `hh:mm:ss`, `mm:ss` or `ss` into seconds. Unparseable parts count
/// as zero.
pub fn parse_duration(duration: &str) -> f64 {
    duration
        .split(':')
        .rev()
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, scale)| part.trim().parse::<f64>().unwrap_or(0.0) * scale)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] chef-acceptance run failed
CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | Suite   | Command   | Duration | Error |
CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | trivial | provision | 00:01:21 | N     |
CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | trivial | verify    | 00:00:15 | Y     |
CHEF-ACCEPTANCE::[2016-05-13 20:19:04 +0000] | trivial | Total     | 00:01:36 | Y     |
done";

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("00:01:21"), 81.0);
        assert_eq!(parse_duration("1:00:00"), 3600.0);
        assert_eq!(parse_duration("42"), 42.0);
        assert_eq!(parse_duration(""), 0.0);
    }

    #[test]
    fn test_extract_timing_and_failures() {
        let lines: Vec<&str> = TABLE.lines().collect();

        let results = extract_acceptance(&lines);

        assert_eq!(results.timing.len(), 1);
        let trivial = &results.timing[0]["trivial"];
        assert_eq!(trivial["provision"], 81.0);
        assert_eq!(trivial["verify"], 15.0);
        assert_eq!(trivial["Total"], 96.0);
        assert_eq!(results.failures, vec!["trivial::verify"], "totals are not failures");
    }

    #[test]
    fn test_separate_tables() {
        let doubled = format!("{TABLE}\n{TABLE}");
        let lines: Vec<&str> = doubled.lines().collect();

        let results = extract_acceptance(&lines);

        assert_eq!(results.timing.len(), 2);
        assert_eq!(results.failures.len(), 2);
    }

    #[test]
    fn test_no_tables() {
        let results = extract_acceptance(&["plain", "log"]);

        assert_eq!(results, AcceptanceResults::default());
    }
}
