use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::block_marker::BlockMarker;
use super::classifier;
use super::types::{Excerpts, FailedIn};

#[allow(clippy::expect_used)]
fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("constant regex pattern is valid")
}

static ERROR: LazyLock<Regex> = LazyLock::new(|| regex(r"\bERROR\b"));

/// `ERROR` lines that show up in healthy builds.
static ERROR_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        regex(r#"(grep|echo) "ERROR 404""#),
        regex(r"ERROR: Failed to post audit report to server"),
    ]
});

static TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        regex(r"The --deployment flag requires a"),
        regex(r"EACCES"),
        regex(r"(?i)\bFATAL\b"),
        regex(r"Errno::ECONNRESET"),
        regex(r"(?i)Permission denied"),
        regex(r"(?i)Connection timed out"),
        regex(r"(?i)Failed to complete (.*) action:"),
        // java stack frame
        regex(r"^\s*at ([a-z_]\w*\.)+[A-Z_]\w*\.[a-z_]\w*\([^)]*\)\s*$"),
        // ruby stack frame
        regex(r"^\s*(\S+):(\d+):in `([^']*)'"),
        regex(r"(?i)^\s*Build step '(.+)' (marked build as|changed build result to) failure\s*$"),
        regex(r"(?i)^\s*Verification of component '(.+)' failed.\s*$"),
        regex(r"freed prematurely"),
        regex(r"(?i)Chef Client failed"),
        regex(r"(?i)Slave went offline during the build"),
        // omnibus warning or error
        regex(r"^\s*(\[([^\]]+)\])? (W|E) \|"),
    ]
});

static RESOURCE_BANNER: LazyLock<Regex> = LazyLock::new(|| regex(r"^(\s*)(={10,})\s*$"));

static SHELL_BANNER: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)^\s*The following shell command exited with status \S+:\s*$"));

static CHEF_VERIFY_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)^\s*Verification of component '(.+)' failed.\s*$"));

static JENKINS_STEP_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)^\s*Build step '(.+)' (marked build as|changed build result to) failure\s*$")
});

/// Sections of the shell failure banner: command, "Output:", output,
/// "Error:", error. Each is followed by a blank line.
const SHELL_BANNER_SECTIONS: usize = 6;

/// Finds the interesting parts of a failed build's console log.
///
/// Returns excerpts keyed by their 1-based first line.
pub fn extract_excerpts(lines: &[&str], context: usize) -> Excerpts {
    let mut blocks = BlockMarker::new(lines.len());
    #[allow(clippy::cast_possible_wrap)]
    let context = context as isize;

    for (index, line) in lines.iter().enumerate() {
        #[allow(clippy::cast_possible_wrap)]
        let at = index as isize;

        if ERROR.is_match(line) {
            if !ERROR_NOISE.iter().any(|noise| noise.is_match(line)) {
                blocks.mark(at - context, at + context);
            }
            continue;
        }

        if TRIGGERS.iter().any(|trigger| trigger.is_match(line)) || classifier::is_signature(line) {
            blocks.mark(at - context, at + context);
        } else if let Some(captures) = RESOURCE_BANNER.captures(line) {
            let indent = captures.get(1).map_or("", |m| m.as_str());
            let next_is_error = lines
                .get(index + 1)
                .is_some_and(|next| next.starts_with(&format!("{indent}Error executing action")));
            if next_is_error {
                // The resource report ends at the first line indented less than the banner.
                let end = skip_until(lines, index, |l| !l.starts_with(indent));
                #[allow(clippy::cast_possible_wrap)]
                let end = end as isize - 1;
                blocks.mark(at - context, end + context);
            }
        } else if SHELL_BANNER.is_match(line) {
            let mut end = index;
            for _ in 0..SHELL_BANNER_SECTIONS {
                end = skip_until(lines, end + 1, str::is_empty);
            }
            #[allow(clippy::cast_possible_wrap)]
            let end = end as isize;
            blocks.mark(at - context, end + context);
        }
    }

    create_excerpts(lines, &blocks)
}

/// Index of the first line at or after `index` matching `stop`, or of the
/// last line if none does.
fn skip_until(lines: &[&str], mut index: usize, stop: impl Fn(&str) -> bool) -> usize {
    while let Some(line) = lines.get(index) {
        if stop(line) || index + 1 >= lines.len() {
            break;
        }
        index += 1;
    }
    index
}

fn create_excerpts(lines: &[&str], blocks: &BlockMarker) -> Excerpts {
    let mut excerpts = BTreeMap::new();
    for block in blocks.blocks() {
        let start = *block.start();
        let mut end = *block.end();
        while end > start && lines[end].trim().is_empty() {
            end -= 1;
        }
        if lines[end].trim().is_empty() {
            continue;
        }

        let mut text = String::new();
        for line in &lines[start..=end] {
            text.push_str(&fix_unsightly_characters(line));
            text.push('\n');
        }
        excerpts.insert(start + 1, text);
    }
    excerpts
}

/// Strips trailing whitespace, expands tabs and escapes control characters
/// so excerpts stay readable in YAML.
pub fn fix_unsightly_characters(line: &str) -> String {
    let mut fixed = String::with_capacity(line.len());
    for c in line.trim_end().chars() {
        match c {
            '\t' => fixed.push_str("  "),
            '\r' | '\n' | '\u{b}' | '\u{c}' => fixed.push(c),
            c if c.is_control() => fixed.push_str(&format!("\\{:o}", u32::from(c))),
            c => fixed.push(c),
        }
    }
    fixed
}

/// Structured failures named directly in the log: failed `chef verify`
/// components and the Jenkins build step that failed the build.
pub fn extract_failed_in(lines: &[&str]) -> FailedIn {
    let mut failed_in = FailedIn::new();
    for line in lines {
        if let Some(captures) = CHEF_VERIFY_FAILURE.captures(line) {
            let components = failed_in.entry("chef verify".to_string()).or_default();
            let component = captures[1].to_string();
            if !components.contains(&component) {
                components.push(component);
                components.sort();
            }
        } else if let Some(captures) = JENKINS_STEP_FAILURE.captures(line) {
            failed_in
                .entry("jenkins".to_string())
                .or_insert_with(|| vec![captures[1].to_string()]);
        }
    }
    failed_in
}
