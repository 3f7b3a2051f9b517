use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Result string used for builds that can no longer be found on the server.
pub const DELETED: &str = "DELETED";

/// Terminal (or not yet terminal) result of a build.
///
/// Jenkins reports `null` while a build is running; everything else is a
/// terminal string such as `SUCCESS`, `FAILURE` or `ABORTED`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildResult {
    Success,
    Failure,
    InProgress,
    Other(String),
}

impl BuildResult {
    pub fn from_wire(result: Option<&str>) -> Self {
        result.map_or(Self::InProgress, |r| Self::from(r.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::InProgress => "IN PROGRESS",
            Self::Other(result) => result,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Neither succeeded nor still running.
    pub fn is_failed(&self) -> bool {
        !self.is_success() && !self.is_in_progress()
    }
}

impl From<String> for BuildResult {
    fn from(value: String) -> Self {
        match value.as_str() {
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "IN PROGRESS" => Self::InProgress,
            _ => Self::Other(value),
        }
    }
}

impl From<BuildResult> for String {
    fn from(value: BuildResult) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job payload as returned by `<job url>api/json?tree=...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_build_number: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub upstream_projects: Vec<ProjectRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub downstream_projects: Vec<ProjectRef>,
    /// Matrix configuration sub-jobs (empty for plain jobs)
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_configurations: Vec<ProjectRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub all_builds: Vec<BuildData>,
}

impl JobData {
    /// Whether any listed build is still running.
    pub fn is_volatile(&self) -> bool {
        self.all_builds.iter().any(|b| b.result.is_none())
    }
}

/// Reference to another job, by name and (sometimes) URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Build payload, either from a job's `allBuilds` or from a matrix build's `runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    pub number: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub result: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Milliseconds (0 while running)
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_on: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<Action>,
}

impl BuildData {
    pub fn result(&self) -> BuildResult {
        BuildResult::from_wire(self.result.as_deref())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }

    /// Duration in seconds. Running builds report no duration.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        if self.result.is_none() {
            return None;
        }
        self.duration.map(|ms| ms as f64 / 1000.0)
    }

    pub fn causes(&self) -> impl Iterator<Item = &Cause> {
        self.actions.iter().flat_map(|action| action.causes.iter())
    }

    /// The first user listed among the causes.
    pub fn triggered_by(&self) -> Option<&str> {
        self.causes().find_map(|cause| cause.user_id.as_deref())
    }

    /// Build parameters, in the order Jenkins lists them.
    pub fn parameters(&self) -> IndexMap<String, String> {
        self.actions
            .iter()
            .flat_map(|action| action.parameters.iter())
            .filter_map(|p| {
                let value = match &p.value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((p.name.clone(), value))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<Cause>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

/// Why a build started: an upstream build or a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cause {
    /// Path relative to the Jenkins root, e.g. `job/my-job/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_build: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_payload_with_nulls() {
        let json = r#"{
            "name": "chef-build",
            "url": "http://jenkins.example.com/job/chef-build/",
            "nextBuildNumber": 13,
            "upstreamProjects": [{"name": "chef-trigger-ad_hoc"}],
            "downstreamProjects": [],
            "activeConfigurations": null,
            "allBuilds": [{
                "number": 12,
                "url": "http://jenkins.example.com/job/chef-build/12/",
                "result": null,
                "timestamp": 1462900986044,
                "duration": 0,
                "actions": [
                    {},
                    {"causes": [{"upstreamUrl": "job/chef-trigger-ad_hoc/", "upstreamBuild": 40}, {"userId": "jkeiser"}]},
                    {"parameters": [{"name": "GIT_REF", "value": "main"}, {"name": "EMPTY", "value": null}]}
                ]
            }]
        }"#;

        let job: JobData = serde_json::from_str(json).unwrap();

        assert_eq!(job.next_build_number, Some(13));
        assert!(job.active_configurations.is_empty());
        assert!(job.is_volatile(), "null result means the build is running");

        let build = &job.all_builds[0];
        assert_eq!(build.result(), BuildResult::InProgress);
        assert_eq!(build.duration_secs(), None);
        assert_eq!(build.causes().count(), 2);
        assert_eq!(build.triggered_by(), Some("jkeiser"));
        assert_eq!(build.parameters().get("GIT_REF"), Some(&"main".to_string()));
        assert!(!build.parameters().contains_key("EMPTY"));
    }

    #[test]
    fn test_build_result_round_trips_through_strings() {
        assert_eq!(BuildResult::from("ABORTED".to_string()), BuildResult::Other("ABORTED".into()));
        assert_eq!(String::from(BuildResult::InProgress), "IN PROGRESS");
        assert!(BuildResult::Other("ABORTED".into()).is_failed());
        assert!(!BuildResult::InProgress.is_failed());
    }

    #[test]
    fn test_duration_in_seconds() {
        let build = BuildData {
            number: 1,
            url: String::new(),
            result: Some("SUCCESS".into()),
            timestamp: Some(1_000),
            duration: Some(90_500),
            built_on: None,
            actions: vec![],
        };
        assert_eq!(build.duration_secs(), Some(90.5));
        assert_eq!(build.timestamp().map(|t| t.timestamp()), Some(1));
    }
}
