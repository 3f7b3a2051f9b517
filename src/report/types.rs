use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::jenkins::BuildResult;

use super::timing::StepTiming;

/// Failure domain → failing identifiers, e.g. `chef verify` → components.
pub type FailedIn = IndexMap<String, Vec<String>>;

/// Log excerpts keyed by their 1-based first line.
pub type Excerpts = BTreeMap<usize, String>;

/// Acceptance suite → command → seconds.
pub type AcceptanceTiming = IndexMap<String, IndexMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureCategory {
    Code,
    Network,
    Machine,
    Unknown,
    /// A non-`FAILURE` terminal result such as `aborted`.
    Result(String),
}

impl FailureCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Code => "code",
            Self::Network => "network",
            Self::Machine => "machine",
            Self::Unknown => "unknown",
            Self::Result(result) => result,
        }
    }
}

impl From<String> for FailureCategory {
    fn from(value: String) -> Self {
        match value.as_str() {
            "code" => Self::Code,
            "network" => Self::Network,
            "machine" => Self::Machine,
            "unknown" => Self::Unknown,
            _ => Self::Result(value),
        }
    }
}

impl From<FailureCategory> for String {
    fn from(value: FailureCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of one stage, or of one matrix run of a stage.
///
/// Durations and delays are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub result: BuildResult,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<FailedIn>,
    /// Log name (`consoleText`) → excerpts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<IndexMap<String, Excerpts>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<StepTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_timing: Option<Vec<AcceptanceTiming>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<IndexMap<String, StageReport>>,
}

impl StageReport {
    pub fn new(result: BuildResult, url: impl Into<String>) -> Self {
        Self {
            result,
            url: url.into(),
            timestamp: None,
            duration: None,
            active_duration: None,
            retries: None,
            retry_delay: None,
            queue_delay: None,
            failure_category: None,
            failure_cause: None,
            failed_in: None,
            logs: None,
            steps: None,
            acceptance_timing: None,
            runs: None,
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = (&String, &StageReport)> {
        self.runs.iter().flatten()
    }
}

/// Values of the change that started a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.git_commit.is_none() && self.project.is_none() && self.version.is_none()
    }
}

/// Report of one pipeline execution, identified by its trigger build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub result: BuildResult,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// User who started the trigger build by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_delays: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delays: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Change::is_empty")]
    pub change: Change,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_logs_analyzed: Option<bool>,
    #[serde(default)]
    pub stages: IndexMap<String, StageReport>,
}

impl PipelineReport {
    pub fn stage_urls(&self) -> impl Iterator<Item = &str> {
        self.stages.values().map(|stage| stage.url.as_str())
    }
}
