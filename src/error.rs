use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Jenkins API error (status {status}) for {url}")]
    ApiError { status: u16, url: String },

    #[error("Jenkins API error (status {status}) after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid Jenkins URL: {0}")]
    InvalidUrl(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job {url} has been deleted and recreated! nextBuildNumber was {previous}, is now {current}")]
    JobRecreated {
        url: String,
        previous: u64,
        current: u64,
    },

    #[error("Build {url} has changed timestamps! Old: {previous}, new: {current}. Perhaps the job was deleted and recreated?")]
    BuildRecreated {
        url: String,
        previous: i64,
        current: i64,
    },

    #[error("Build {url} has upstreams from more than one job: {}", jobs.join(", "))]
    MultipleUpstreamJobs { url: String, jobs: Vec<String> },
}

pub type Result<T> = std::result::Result<T, ReportError>;
