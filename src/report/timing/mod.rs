mod step;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use log::debug;
use regex::Regex;

pub use step::{StepId, StepTiming, StepTree};

#[allow(clippy::expect_used)]
fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("constant regex pattern is valid")
}

/// `[Builder: chef] I | 2016-05-11T20:29:35+00:00 | ...`
static OMNIBUS: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^\s*(\[(.+)\])? [A-Z] \| (\d+-\d+-\d+T\d+:\d+:\d+[+-]\d+:\d+) \|")
});

/// `CHEF-ACCEPTANCE::PROVISION[2016-06-10 23:54:43 +0000]`
static ACCEPTANCE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"^(\S+)::(\S*)\s*\[(\d+-\d+-\d+ \d+:\d+:\d+ [+-]\d+)\]"));

static PEDANT_START: LazyLock<Regex> = LazyLock::new(|| regex(r"^Starting Pedant Run: (.+)"));

static PEDANT_FINISH: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^Finished in (\S+) minutes (\S+) seconds \(files took \S+ seconds to load\)")
});

static CHEF_START: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^\[(\d+-\d+-\d+T\d+:\d+:\d+[+-]\d+:\d+)\] INFO: \*\*\* Chef \S+ \*\*\*$")
});

static CHEF_RUN_LIST: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^\[(\d+-\d+-\d+T\d+:\d+:\d+[+-]\d+:\d+)\] INFO: Run List expands to \[(.+)\]")
});

static CHEF_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^\[(\d+-\d+-\d+T\d+:\d+:\d+[+-]\d+:\d+)\] INFO: Chef Run complete in \S+ seconds")
});

const OMNIBUS_STEP: &str = "omnibus";
const ACCEPTANCE_STEP: &str = "CHEF-ACCEPTANCE";
const PEDANT_STEP: &str = "pedant";
const CHEF_CLIENT_STEP: &str = "chef-client";

/// Omnibus categories that belong to the build phase. A new software in
/// one of them ends everything running in the others.
const BUILD_CATEGORIES: &[&str] = &["GitCache", "Builder"];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TimingResults {
    /// `None` when the log has no steps worth breaking down.
    pub steps: Option<StepTiming>,
    /// Description of the last omnibus line, e.g. `Builder: chef`.
    pub last_omnibus_step: Option<String>,
}

/// Parses the timestamps used by the supported tools. Returns `None` for
/// anything else.
pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }
    if let Ok(time) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z") {
        return Some(time.with_timezone(&Utc));
    }
    let naive = text.strip_suffix(" UTC").unwrap_or(text);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|time| time.and_utc())
}

/// `start` moved by `seconds`, or `None` when that is not a representable time.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn offset_time(start: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let elapsed = TimeDelta::try_milliseconds(millis as i64)?;
    start.checked_add_signed(elapsed)
}

/// Rebuilds the step tree of a build from its console log.
///
/// `start` is the build start; a known `duration` extends the root to the
/// build end so trailing time is reported as cleanup.
pub fn extract_steps(
    lines: &[&str],
    start: DateTime<Utc>,
    duration: Option<f64>,
    threshold: f64,
) -> TimingResults {
    let mut extractor = TimingExtractor {
        tree: StepTree::new("run", start, 0),
        last_step: None,
        index: 0,
        last_omnibus_step: None,
    };
    for (index, line) in lines.iter().enumerate() {
        extractor.index = index;
        extractor.process(line);
    }
    extractor.finish(start, duration, threshold)
}

struct TimingExtractor {
    tree: StepTree,
    last_step: Option<StepId>,
    index: usize,
    last_omnibus_step: Option<String>,
}

impl TimingExtractor {
    fn root(&self) -> StepId {
        self.tree.root()
    }

    fn process(&mut self, line: &str) {
        let root = self.root();
        if let Some(captures) = OMNIBUS.captures(line) {
            let description = captures.get(2).map(|m| m.as_str().to_string());
            if let Some(time) = parse_time(&captures[3]) {
                self.found_omnibus_line(description, time);
            }
        } else if let Some(captures) = ACCEPTANCE.captures(line) {
            let Some(time) = parse_time(&captures[3]) else {
                return;
            };
            let mut path = vec![&captures[1]];
            if !captures[2].is_empty() {
                path.push(&captures[2]);
            }
            if path[0] != ACCEPTANCE_STEP {
                path.insert(0, ACCEPTANCE_STEP);
            }
            self.update_step(&path, time);
        } else if let Some(captures) = PEDANT_START.captures(line) {
            if let Some(time) = parse_time(&captures[1]) {
                self.tree.close_path(root, &[PEDANT_STEP]);
                self.update_step(&[PEDANT_STEP], time);
            }
        } else if let Some(captures) = PEDANT_FINISH.captures(line) {
            let minutes: f64 = captures[1].parse().unwrap_or(0.0);
            let seconds: f64 = captures[2].parse().unwrap_or(0.0);
            if let Some(pedant) = self.tree.get(root, &[PEDANT_STEP]) {
                let start = self.tree.start_time(pedant);
                let Some(time) = offset_time(start, minutes * 60.0 + seconds) else {
                    debug!("Skipping pedant duration on line {}: {line}", self.index + 1);
                    return;
                };
                self.update_step(&[PEDANT_STEP], time);
                self.tree.close_path(root, &[PEDANT_STEP]);
            }
        } else if let Some(captures) = CHEF_START.captures(line) {
            if let Some(time) = parse_time(&captures[1]) {
                self.tree.close_path(root, &[CHEF_CLIENT_STEP]);
                self.update_step(&[CHEF_CLIENT_STEP], time);
            }
        } else if let Some(captures) = CHEF_RUN_LIST.captures(line) {
            if let Some(time) = parse_time(&captures[1]) {
                let chef_client = self.update_step(&[CHEF_CLIENT_STEP], time);
                self.tree
                    .set_display(chef_client, format!("{CHEF_CLIENT_STEP} {}", &captures[2]));
            }
        } else if let Some(captures) = CHEF_COMPLETE.captures(line) {
            if let Some(time) = parse_time(&captures[1]) {
                self.update_step(&[CHEF_CLIENT_STEP], time);
                self.tree.close_path(root, &[CHEF_CLIENT_STEP]);
            }
        }
    }

    /// Extends the previously updated step to `time`, closes it when it is
    /// an open sibling of the new step, then updates the new step.
    fn update_step(&mut self, path: &[&str], time: DateTime<Utc>) -> StepId {
        let root = self.root();
        if let Some(last) = self.last_step.filter(|last| self.tree.is_open(*last)) {
            self.tree.extend(last, time);
            if let Some((name, parent_path)) = path.split_last() {
                let parent = self.tree.get(root, parent_path);
                if parent.is_some() && self.tree.parent(last) == parent && self.tree.name(last) != *name {
                    self.tree.close(last);
                }
            }
        }
        let step = self.tree.update(root, path, time, self.index);
        self.last_step = Some(step);
        step
    }

    fn found_omnibus_line(&mut self, description: Option<String>, time: DateTime<Utc>) {
        let root = self.root();
        // The previous omnibus step runs until this line, even if it gets closed below.
        if let Some(last) = self.last_step.filter(|last| self.tree.is_open(*last)) {
            self.tree.extend(last, time);
        }
        let parts: Vec<String> = description
            .as_deref()
            .map(|d| d.split(": ").map(str::to_string).collect())
            .unwrap_or_default();
        let category = parts.first().map(String::as_str);
        let software = parts.get(1).map(String::as_str);

        let omnibus = self.tree.get(root, &[OMNIBUS_STEP]);
        let mut phase: Option<String> = None;
        if let Some(omnibus) = omnibus {
            if let Some(category) = category.filter(|c| BUILD_CATEGORIES.contains(c)) {
                phase = Some("build".to_string());
                if let Some(software) = software {
                    let mut path = vec![OMNIBUS_STEP, "build"];
                    path.extend(parts.iter().map(String::as_str));
                    if self.tree.get(root, &path).is_none() {
                        self.switch_build_software(omnibus, category, software);
                    }
                }
            } else {
                phase = self.tree.open_child_names(omnibus).into_iter().next();
            }
        }
        let phase = phase.unwrap_or_else(|| "fetch".to_string());
        if let Some(omnibus) = omnibus {
            self.tree.close_all_except(omnibus, &[&phase]);
        }

        let mut path = vec![OMNIBUS_STEP, phase.as_str()];
        path.extend(parts.iter().map(String::as_str));
        self.update_step(&path, time);
        if let Some(description) = description {
            self.last_omnibus_step = Some(description);
        }
    }

    /// A new software starting in one build category ends the others.
    fn switch_build_software(&mut self, omnibus: StepId, category: &str, software: &str) {
        let Some(build) = self.tree.get(omnibus, &["build"]) else {
            return;
        };
        for name in self.tree.open_child_names(build) {
            let Some(open) = self.tree.get(build, &[&name]) else {
                continue;
            };
            if name == category {
                self.tree.close_all_except(open, &[software]);
            } else {
                self.tree.close_all(open);
            }
        }
    }

    fn finish(mut self, start: DateTime<Utc>, duration: Option<f64>, threshold: f64) -> TimingResults {
        let root = self.root();
        if let Some(end) = duration.and_then(|duration| offset_time(start, duration)) {
            self.tree.update(root, &[], end, self.index);
        }
        self.tree.close(root);

        let steps = match self.tree.step_timing(root, threshold) {
            StepTiming::Seconds(seconds) => {
                debug!("No step breakdown found ({seconds}s total)");
                None
            }
            breakdown => Some(breakdown),
        };
        TimingResults {
            steps,
            last_omnibus_step: self.last_omnibus_step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn start() -> DateTime<Utc> {
        parse_time("2016-05-11T20:00:00+00:00").unwrap()
    }

    fn breakdown(timing: &Option<StepTiming>) -> &IndexMap<String, StepTiming> {
        match timing {
            Some(StepTiming::Breakdown(breakdown)) => breakdown,
            other => panic!("expected a breakdown, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = start();

        assert_eq!(parse_time("2016-05-11T20:00:00+00:00"), Some(expected));
        assert_eq!(parse_time("2016-05-11 22:00:00 +0200"), Some(expected));
        assert_eq!(parse_time("2016-05-11 20:00:00 UTC"), Some(expected));
        assert_eq!(parse_time("yesterday"), None);
    }

    #[test]
    fn test_omnibus_phases() {
        // Arrange
        let log = [
            "Started by upstream project",
            "           I | 2016-05-11T20:01:00+00:00 | Resolving dependencies",
            "[GitCache: chef] I | 2016-05-11T20:02:00+00:00 | Restoring",
            "[Builder: chef] I | 2016-05-11T20:03:00+00:00 | Building chef",
            "[Builder: chef] I | 2016-05-11T20:10:00+00:00 | Built chef",
            "[Builder: ohai] I | 2016-05-11T20:11:00+00:00 | Building ohai",
            "[Builder: ohai] I | 2016-05-11T20:20:00+00:00 | Built ohai",
        ];

        // Act
        let results = extract_steps(&log, start(), Some(1500.0), 10.0);

        // Assert
        let steps = breakdown(&results.steps);
        let omnibus = match &steps[OMNIBUS_STEP] {
            StepTiming::Breakdown(omnibus) => omnibus,
            other => panic!("omnibus has no phases: {other:?}"),
        };
        assert!(omnibus.contains_key("fetch"));
        assert!(omnibus.contains_key("build"));
        assert_eq!(steps["before (setup time)"], StepTiming::Seconds(60.0));
        assert_eq!(results.last_omnibus_step.as_deref(), Some("Builder: ohai"));
    }

    #[test]
    fn test_chef_client_run() {
        let log = [
            "[2016-05-11T20:00:30+00:00] INFO: *** Chef 12.10.24 ***",
            "[2016-05-11T20:01:00+00:00] INFO: Run List expands to [kitchen::default]",
            "[2016-05-11T20:05:30+00:00] INFO: Chef Run complete in 270 seconds",
        ];

        let results = extract_steps(&log, start(), Some(400.0), 10.0);

        let steps = breakdown(&results.steps);
        assert_eq!(
            steps["chef-client kitchen::default"],
            StepTiming::Seconds(300.0),
            "display name includes the run list"
        );
    }

    #[test]
    fn test_acceptance_and_pedant() {
        let log = [
            "CHEF-ACCEPTANCE::PROVISION[2016-05-11 20:00:00 +0000]",
            "CHEF-ACCEPTANCE::VERIFY[2016-05-11 20:05:00 +0000]",
            "Starting Pedant Run: 2016-05-11 20:06:00 UTC",
            "Finished in 2 minutes 30 seconds (files took 1.2 seconds to load)",
        ];

        let results = extract_steps(&log, start(), Some(600.0), 10.0);

        let steps = breakdown(&results.steps);
        assert!(steps.contains_key(ACCEPTANCE_STEP));
        assert_eq!(steps[PEDANT_STEP], StepTiming::Seconds(150.0));
    }

    #[test]
    fn test_unrepresentable_pedant_duration_is_skipped() {
        // Arrange
        let log = [
            "Starting Pedant Run: 2016-05-11 20:06:00 UTC",
            "Finished in 1e300 minutes 0 seconds (files took 1.2 seconds to load)",
            "Finished in inf minutes NaN seconds (files took 1.2 seconds to load)",
            "[2016-05-11T20:10:30+00:00] INFO: *** Chef 12.10.24 ***",
            "[2016-05-11T20:11:00+00:00] INFO: Run List expands to [kitchen::default]",
            "[2016-05-11T20:15:30+00:00] INFO: Chef Run complete in 270 seconds",
        ];

        // Act
        let results = extract_steps(&log, start(), Some(1200.0), 10.0);

        // Assert
        let steps = breakdown(&results.steps);
        assert_eq!(
            steps["chef-client kitchen::default"],
            StepTiming::Seconds(300.0),
            "lines after the bad duration are still read"
        );
    }

    #[test]
    fn test_offset_time_bounds() {
        assert_eq!(
            offset_time(start(), 90.5),
            Some(start() + TimeDelta::milliseconds(90_500))
        );
        assert_eq!(offset_time(start(), 6e17), None);
        assert_eq!(offset_time(start(), f64::NAN), None);
        assert_eq!(offset_time(start(), f64::INFINITY), None);
    }

    #[test]
    fn test_bad_timestamps_are_skipped() {
        let log = ["[2016-13-45T99:00:00+00:00] INFO: *** Chef 12.10.24 ***", "plain"];

        let results = extract_steps(&log, start(), Some(100.0), 10.0);

        assert_eq!(results, TimingResults::default());
    }
}
