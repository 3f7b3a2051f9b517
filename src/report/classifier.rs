use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::jenkins::BuildResult;

use super::types::{FailedIn, FailureCategory};

/// `failed_in` domains that describe where the build broke rather than
/// which tests failed.
pub const INFRASTRUCTURE_DOMAINS: &[&str] = &["omnibus", "jenkins"];

/// Domains with more failures than this are reported by name only.
const MAX_LISTED_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: FailureCategory,
    pub cause: String,
}

impl Classification {
    fn new(category: FailureCategory, cause: impl Into<String>) -> Self {
        Self {
            category,
            cause: cause.into(),
        }
    }
}

type CauseBuilder = fn(&Captures<'_>, &str) -> String;

struct Rule {
    pattern: Regex,
    category: FailureCategory,
    cause: CauseBuilder,
}

impl Rule {
    #[allow(clippy::expect_used)]
    fn new(pattern: &str, category: FailureCategory, cause: CauseBuilder) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("constant regex pattern is valid"),
            category,
            cause,
        }
    }

    fn apply(&self, excerpt: &str) -> Option<Classification> {
        let captures = self.pattern.captures(excerpt)?;
        Some(Classification::new(
            self.category.clone(),
            (self.cause)(&captures, excerpt),
        ))
    }
}

fn network_timeout(captures: &Captures<'_>, _: &str) -> String {
    format!("network timeout {}:{}", &captures[1], &captures[2])
}

static HIGH_CONFIDENCE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureCategory::Network;
    vec![
        Rule::new(
            r"(?i)Failed to connect to (.+) port (\d+): Timed out",
            Network,
            network_timeout,
        ),
        Rule::new(
            r"(?i)Failed connect to (.+):(\d+); (Operation|Connection) (timed out|now in progress)",
            Network,
            network_timeout,
        ),
    ]
});

#[allow(clippy::expect_used)]
static RESET_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ECONNRESET.*(https?://\S+)").expect("constant regex pattern is valid"));

fn network_reset(_: &Captures<'_>, excerpt: &str) -> String {
    let host = RESET_URL
        .captures(excerpt)
        .and_then(|c| Url::parse(&c[1]).ok())
        .and_then(|url| url.host_str().map(str::to_string));
    match host {
        Some(host) => format!("network reset {host}"),
        None => "network reset".to_string(),
    }
}

static GENERAL_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureCategory::{Code, Machine, Network};
    vec![
        Rule::new(r"Slave went offline during the build", Network, |_, _| {
            "worker disconnected".into()
        }),
        Rule::new(
            r"The --deployment flag requires a .*/([^/]+/Gemfile\.lock)",
            Code,
            |c, _| format!("missing {}", &c[1]),
        ),
        Rule::new(r"(EACCES)", Machine, |c, _| format!("disk space ({})", &c[1])),
        Rule::new(
            r"java\.io\.FileNotFoundException.*(Permission denied)",
            Machine,
            |c, _| format!("disk space ({})", &c[1]),
        ),
        Rule::new(
            r"(?i)Cannot delete workspace:.*The process cannot access the file because it is being used by another process\.",
            Machine,
            |_, _| "zombie jenkins".into(),
        ),
        Rule::new(r"ECONNRESET", Network, network_reset),
        Rule::new(r"(?i)jenkinsci.*Connection timed out", Network, |_, _| {
            "network timeout jenkins".into()
        }),
        Rule::new(r"(?i)IOException.*: Failed to extract", Network, |_, _| {
            "jenkins copy".into()
        }),
        Rule::new(r"(?is)Unable to create .*index\.lock.*File exists", Machine, |_, _| {
            "git index.lock".into()
        }),
        Rule::new(r"(?is)Dumping stack trace to\s+(\S+)\.stackdump", Machine, |c, _| {
            format!("segfault {}", &c[1])
        }),
        Rule::new(
            r"(?i)Finder got an error: Application isn.*t running",
            Machine,
            |_, _| "mac not logged in".into(),
        ),
        Rule::new(r"Gemfile\.lock is corrupt", Code, |_, _| {
            "corrupt Gemfile.lock".into()
        }),
        Rule::new(
            r"(?i)An error occurred while installing (\S+) \(([^)]+)\)",
            Code,
            |c, _| format!("gem install {} -v {}", &c[1], &c[2]),
        ),
        Rule::new(
            r"(?is)rubygems\.org.*Checksum of (\S+) does not match the checksum provided by server",
            Network,
            |c, _| format!("rubygems {} checksum", &c[1]),
        ),
        Rule::new(r"(?i)Could not find (\S+) in any of the sources", Code, |c, _| {
            format!("yanked gem {}", &c[1])
        }),
    ]
});

/// Whether any classification rule recognizes the line.
pub fn is_signature(line: &str) -> bool {
    HIGH_CONFIDENCE_RULES
        .iter()
        .chain(GENERAL_RULES.iter())
        .any(|rule| rule.pattern.is_match(line))
}

/// Classifies a finished, unsuccessful build. Returns `None` for successful
/// or in-progress builds.
///
/// First match wins:
/// 1. non-`FAILURE` terminal results classify as themselves
/// 2. structured test failures already found in the log
/// 3. high-confidence infrastructure signatures
/// 4. the general rule table, first excerpt then first rule
/// 5. the last omnibus step, or `unknown`
pub fn classify<'a>(
    result: &BuildResult,
    excerpts: impl IntoIterator<Item = &'a str> + Clone,
    failed_in: &FailedIn,
) -> Option<Classification> {
    match result {
        BuildResult::Success | BuildResult::InProgress => return None,
        BuildResult::Other(other) => {
            let other = other.to_lowercase();
            return Some(Classification::new(FailureCategory::from(other.clone()), other));
        }
        BuildResult::Failure => {}
    }

    if let Some(classification) = classify_test_failures(failed_in) {
        return Some(classification);
    }

    for rules in [&*HIGH_CONFIDENCE_RULES, &*GENERAL_RULES] {
        for excerpt in excerpts.clone() {
            if let Some(classification) = rules.iter().find_map(|rule| rule.apply(excerpt)) {
                return Some(classification);
            }
        }
    }

    let fallback = failed_in
        .get("omnibus")
        .and_then(|steps| steps.last())
        .map_or_else(
            || Classification::new(FailureCategory::Unknown, "unknown"),
            |step| Classification::new(FailureCategory::Code, step.clone()),
        );
    Some(fallback)
}

fn classify_test_failures(failed_in: &FailedIn) -> Option<Classification> {
    let mut causes = Vec::new();
    for (domain, tests) in failed_in {
        if INFRASTRUCTURE_DOMAINS.contains(&domain.as_str()) || tests.is_empty() {
            continue;
        }
        let mut unique: Vec<&str> = Vec::new();
        for test in tests {
            if !unique.contains(&test.as_str()) {
                unique.push(test);
            }
        }
        if unique.len() <= MAX_LISTED_FAILURES {
            causes.push(format!("{domain}[{}]", unique.join(",")));
        } else {
            causes.push(domain.clone());
        }
    }

    if causes.is_empty() {
        None
    } else {
        Some(Classification::new(FailureCategory::Code, causes.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_failed_in(entries: &[(&str, &[&str])]) -> FailedIn {
        entries
            .iter()
            .map(|(domain, tests)| {
                (
                    (*domain).to_string(),
                    tests.iter().map(|t| (*t).to_string()).collect(),
                )
            })
            .collect()
    }

    fn classify_failure(excerpts: &[&str], failed_in: &FailedIn) -> Classification {
        classify(&BuildResult::Failure, excerpts.iter().copied(), failed_in)
            .expect("failed builds are always classified")
    }

    mod result_tests {
        use super::*;

        #[test]
        fn test_success_and_in_progress_are_not_classified() {
            let none = FailedIn::new();
            assert!(classify(&BuildResult::Success, ["EACCES"], &none).is_none());
            assert!(classify(&BuildResult::InProgress, ["EACCES"], &none).is_none());
        }

        #[test]
        fn test_other_results_short_circuit() {
            let failed_in = create_failed_in(&[("chef verify", &["berkshelf"])]);

            let classification =
                classify(&BuildResult::Other("ABORTED".into()), ["EACCES"], &failed_in).unwrap();

            assert_eq!(classification.category.as_str(), "aborted");
            assert_eq!(classification.cause, "aborted");
        }
    }

    mod cascade_tests {
        use super::*;

        #[test]
        fn test_network_timeout() {
            let classification = classify_failure(
                &["curl: (7) Failed to connect to example.com port 443: Timed out\n"],
                &FailedIn::new(),
            );

            assert_eq!(classification.category, FailureCategory::Network);
            assert_eq!(classification.cause, "network timeout example.com:443");
        }

        #[test]
        fn test_test_failures_beat_patterns() {
            let failed_in = create_failed_in(&[
                ("jenkins", &["Execute shell"]),
                ("chef verify", &["berkshelf", "test-kitchen"]),
            ]);

            let classification = classify_failure(&["EACCES"], &failed_in);

            assert_eq!(classification.category, FailureCategory::Code);
            assert_eq!(classification.cause, "chef verify[berkshelf,test-kitchen]");
        }

        #[test]
        fn test_many_failures_are_abbreviated() {
            let failed_in = create_failed_in(&[
                ("chef_acceptance", &["a::verify", "b::verify", "c::verify", "d::verify"]),
                ("chef verify", &["git"]),
            ]);

            let classification = classify_failure(&[], &failed_in);

            assert_eq!(classification.cause, "chef_acceptance,chef verify[git]");
        }

        #[test]
        fn test_high_confidence_beats_earlier_general_match() {
            let excerpts = [
                "Errno::EACCES: Permission denied\n",
                "fatal: Failed connect to github.com:443; Connection timed out\n",
            ];

            let classification = classify_failure(&excerpts, &FailedIn::new());

            assert_eq!(classification.cause, "network timeout github.com:443");
        }

        #[test]
        fn test_first_excerpt_wins_over_earlier_rule() {
            let excerpts = [
                "Could not find foo-1.0 in any of the sources\n",
                "Slave went offline during the build\n",
            ];

            let classification = classify_failure(&excerpts, &FailedIn::new());

            assert_eq!(classification.cause, "yanked gem foo-1.0");
        }

        #[test]
        fn test_first_rule_wins_within_excerpt() {
            let excerpt = "Gemfile.lock is corrupt\nERROR: EACCES writing /var/cache\n";

            let classification = classify_failure(&[excerpt], &FailedIn::new());

            assert_eq!(classification.category, FailureCategory::Machine);
            assert_eq!(classification.cause, "disk space (EACCES)");
        }

        #[test]
        fn test_network_reset_names_host() {
            let classification = classify_failure(
                &["Errno::ECONNRESET: Connection reset by peer - fetching https://rubygems.org/gems/x\n"],
                &FailedIn::new(),
            );

            assert_eq!(classification.cause, "network reset rubygems.org");
        }

        #[test]
        fn test_gem_install_failure() {
            let classification = classify_failure(
                &["An error occurred while installing nokogiri (1.6.7.2), and Bundler cannot continue.\n"],
                &FailedIn::new(),
            );

            assert_eq!(classification.cause, "gem install nokogiri -v 1.6.7.2");
        }

        #[test]
        fn test_fallback_to_omnibus_step() {
            let failed_in = create_failed_in(&[("omnibus", &["Builder: chef"])]);

            let classification = classify_failure(&["nothing to see\n"], &failed_in);

            assert_eq!(classification.category, FailureCategory::Code);
            assert_eq!(classification.cause, "Builder: chef");
        }

        #[test]
        fn test_fallback_to_unknown() {
            let classification = classify_failure(&["nothing to see\n"], &FailedIn::new());

            assert_eq!(classification.category, FailureCategory::Unknown);
            assert_eq!(classification.cause, "unknown");
        }

        #[test]
        fn test_classification_is_idempotent() {
            let excerpts = ["Dumping stack trace to ruby.exe.stackdump\n", "EACCES\n"];
            let failed_in = FailedIn::new();

            let first = classify_failure(&excerpts, &failed_in);
            let second = classify_failure(&excerpts, &failed_in);

            assert_eq!(first, second);
            assert_eq!(first.cause, "segfault ruby.exe");
        }
    }

    #[test]
    fn test_every_rule_is_a_signature() {
        assert!(is_signature("Slave went offline during the build"));
        assert!(is_signature("Failed to connect to h port 80: Timed out"));
        assert!(!is_signature("Finished: SUCCESS"));
    }
}
