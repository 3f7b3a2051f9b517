pub mod cache;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod graph;
pub mod links;
pub mod types;

pub use cache::{CachePolicy, DataCache};
pub use client::JenkinsClient;
pub use graph::{BuildId, JobId, PipelineGraph};
pub use types::{BuildData, BuildResult, JobData};

use crate::error::Result;

/// The data a pipeline graph needs from a Jenkins server.
pub trait JenkinsApi {
    /// Job payload, or `None` if the job does not exist.
    fn fetch_job(&self, job_url: &str) -> Result<Option<JobData>>;

    /// Matrix runs of a build (empty for plain builds).
    fn fetch_build_runs(&self, build_url: &str) -> Result<Vec<BuildData>>;

    /// Raw console log, or `None` if it is gone.
    fn fetch_console_text(&self, build_url: &str) -> Result<Option<String>>;
}
