use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;

use super::types::{Action, BuildData, Cause, JobData, Parameter, ProjectRef};
use super::JenkinsApi;

pub const ROOT: &str = "http://jenkins.example.com/";

/// Build start times are spaced one hour apart per build number.
pub const BASE_TIMESTAMP_MS: i64 = 1_462_900_000_000;

pub fn job_url(name: &str) -> String {
    format!("{ROOT}job/{name}/")
}

pub fn build_url(name: &str, number: u64) -> String {
    format!("{}{number}/", job_url(name))
}

/// A build of `job` that started `number` hours after the base time and ran
/// for `duration_secs` (ignored while in progress).
pub fn create_build(job: &str, number: u64, result: Option<&str>, duration_secs: i64) -> BuildData {
    #[allow(clippy::cast_possible_wrap)]
    let offset = number as i64 * 3_600_000;
    BuildData {
        number,
        url: build_url(job, number),
        result: result.map(str::to_string),
        timestamp: Some(BASE_TIMESTAMP_MS + offset),
        duration: Some(if result.is_some() { duration_secs * 1000 } else { 0 }),
        built_on: None,
        actions: vec![],
    }
}

/// Adds an upstream cause pointing at `job` #`number`.
pub fn caused_by(mut build: BuildData, job: &str, number: u64) -> BuildData {
    build.actions.push(Action {
        causes: vec![Cause {
            upstream_url: Some(format!("job/{job}/")),
            upstream_build: Some(number),
            user_id: None,
        }],
        parameters: vec![],
    });
    build
}

/// Adds a cause saying `user` started the build by hand.
pub fn started_by(mut build: BuildData, user: &str) -> BuildData {
    build.actions.push(Action {
        causes: vec![Cause {
            user_id: Some(user.to_string()),
            ..Cause::default()
        }],
        parameters: vec![],
    });
    build
}

pub fn with_parameter(mut build: BuildData, name: &str, value: &str) -> BuildData {
    build.actions.push(Action {
        causes: vec![],
        parameters: vec![Parameter {
            name: name.to_string(),
            value: serde_json::Value::String(value.to_string()),
        }],
    });
    build
}

#[derive(Default)]
struct FakeState {
    jobs: HashMap<String, JobData>,
    runs: HashMap<String, Vec<BuildData>>,
    console: HashMap<String, String>,
    job_fetches: HashMap<String, usize>,
    runs_fetches: HashMap<String, usize>,
    console_fetches: HashMap<String, usize>,
}

/// In-memory Jenkins serving pre-configured payloads. Every fetch is counted
/// so tests can check what was re-read after an invalidation.
///
/// Cloning shares state, so a test can keep a handle after giving one to a graph.
#[derive(Clone, Default)]
pub struct FakeJenkins {
    state: Rc<RefCell<FakeState>>,
}

impl FakeJenkins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or replaces) a job with the given downstream projects and builds.
    pub fn set_job(&self, name: &str, downstream: &[&str], builds: Vec<BuildData>) {
        let next = builds.iter().map(|b| b.number).max().unwrap_or(0) + 1;
        self.set_job_data(JobData {
            name: name.to_string(),
            url: job_url(name),
            next_build_number: Some(next),
            upstream_projects: vec![],
            downstream_projects: downstream
                .iter()
                .map(|d| ProjectRef {
                    name: (*d).to_string(),
                    url: None,
                })
                .collect(),
            active_configurations: vec![],
            all_builds: builds,
        });
    }

    pub fn set_job_data(&self, job: JobData) {
        self.state.borrow_mut().jobs.insert(job.url.clone(), job);
    }

    /// Marks a job as a matrix job with the given configuration names.
    pub fn set_configurations(&self, name: &str, configurations: &[&str]) {
        let mut state = self.state.borrow_mut();
        if let Some(job) = state.jobs.get_mut(&job_url(name)) {
            job.active_configurations = configurations
                .iter()
                .map(|c| ProjectRef {
                    name: (*c).to_string(),
                    url: Some(format!("{}{c}/", job_url(name))),
                })
                .collect();
        }
    }

    pub fn set_runs(&self, build_url: &str, runs: Vec<BuildData>) {
        self.state.borrow_mut().runs.insert(build_url.to_string(), runs);
    }

    pub fn set_console(&self, build_url: &str, text: &str) {
        self.state
            .borrow_mut()
            .console
            .insert(build_url.to_string(), text.to_string());
    }

    pub fn job_fetches(&self, job_url: &str) -> usize {
        self.state.borrow().job_fetches.get(job_url).copied().unwrap_or(0)
    }

    pub fn runs_fetches(&self, build_url: &str) -> usize {
        self.state.borrow().runs_fetches.get(build_url).copied().unwrap_or(0)
    }

    pub fn console_fetches(&self, build_url: &str) -> usize {
        self.state
            .borrow()
            .console_fetches
            .get(build_url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_console_fetches(&self) -> usize {
        self.state.borrow().console_fetches.values().sum()
    }
}

impl JenkinsApi for FakeJenkins {
    fn fetch_job(&self, job_url: &str) -> Result<Option<JobData>> {
        let mut state = self.state.borrow_mut();
        *state.job_fetches.entry(job_url.to_string()).or_default() += 1;
        Ok(state.jobs.get(job_url).cloned())
    }

    fn fetch_build_runs(&self, build_url: &str) -> Result<Vec<BuildData>> {
        let mut state = self.state.borrow_mut();
        *state.runs_fetches.entry(build_url.to_string()).or_default() += 1;
        Ok(state.runs.get(build_url).cloned().unwrap_or_default())
    }

    fn fetch_console_text(&self, build_url: &str) -> Result<Option<String>> {
        let mut state = self.state.borrow_mut();
        *state.console_fetches.entry(build_url.to_string()).or_default() += 1;
        Ok(state.console.get(build_url).cloned())
    }
}
