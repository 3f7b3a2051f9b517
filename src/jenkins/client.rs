use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::auth::Token;
use crate::error::{ReportError, Result};

use super::types::{BuildData, JobData};
use super::JenkinsApi;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;

const BUILD_FIELDS: &str = "number,url,result,timestamp,duration,builtOn,\
actions[causes[upstreamUrl,upstreamBuild,userId],parameters[name,value]]";

fn job_tree() -> String {
    format!(
        "name,url,nextBuildNumber,upstreamProjects[name,url],downstreamProjects[name,url],\
activeConfigurations[name,url],allBuilds[{BUILD_FIELDS}]"
    )
}

fn runs_tree() -> String {
    format!("runs[{BUILD_FIELDS}]")
}

#[derive(Deserialize)]
struct RunsPayload {
    #[serde(default)]
    runs: Option<Vec<BuildData>>,
}

/// Blocking Jenkins REST client.
pub struct JenkinsClient {
    client: Client,
    user: Option<String>,
    token: Option<Token>,
    max_retries: u32,
    retry_delay: Duration,
}

impl JenkinsClient {
    pub fn new(user: Option<String>, token: Option<Token>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pipeline-report/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReportError::Config(format!("Failed to create HTTP client: {e}")))?;

        if token.is_some() && user.is_none() {
            warn!("A Jenkins token was given without a user; requests will be anonymous");
        }

        Ok(Self {
            client,
            user,
            token,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECONDS),
        })
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.token.as_ref().map(Token::as_str)),
            None => request,
        }
    }

    fn api_url(base: &str, path: &str, tree: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(base)
            .and_then(|base| base.join(path))
            .map_err(|e| ReportError::InvalidUrl(format!("{base}: {e}")))?;
        if let Some(tree) = tree {
            url.query_pairs_mut().append_pair("tree", tree);
        }
        Ok(url)
    }

    /// GET with automatic retry on network errors, rate limits and server errors.
    /// Returns `None` for 404.
    fn get(&self, url: Url) -> Result<Option<Response>> {
        info!("GET {url}");

        let mut retry_count = 0;
        loop {
            let request = self.auth_request(self.client.get(url.clone()));

            let response = match request.send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= self.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        self.retry_delay.as_secs(),
                        retry_count + 1,
                        self.max_retries
                    );
                    thread::sleep(self.retry_delay);
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(ReportError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.max_retries,
                    });
                }

                warn!(
                    "Jenkins API error (status {status}). Waiting {}s before retry {}/{}...",
                    self.retry_delay.as_secs(),
                    retry_count + 1,
                    self.max_retries
                );

                thread::sleep(self.retry_delay);
                retry_count += 1;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                debug!("{url} not found");
                return Ok(None);
            }

            if !status.is_success() {
                return Err(ReportError::ApiError {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(Some(response));
        }
    }
}

impl JenkinsApi for JenkinsClient {
    fn fetch_job(&self, job_url: &str) -> Result<Option<JobData>> {
        let url = Self::api_url(job_url, "api/json", Some(&job_tree()))?;
        match self.get(url)? {
            Some(response) => Ok(Some(response.json()?)),
            None => Ok(None),
        }
    }

    fn fetch_build_runs(&self, build_url: &str) -> Result<Vec<BuildData>> {
        let url = Self::api_url(build_url, "api/json", Some(&runs_tree()))?;
        match self.get(url)? {
            Some(response) => {
                let payload: RunsPayload = response.json()?;
                Ok(payload.runs.unwrap_or_default())
            }
            None => Ok(Vec::new()),
        }
    }

    fn fetch_console_text(&self, build_url: &str) -> Result<Option<String>> {
        let url = Self::api_url(build_url, "consoleText", None)?;
        match self.get(url)? {
            Some(response) => Ok(Some(response.text()?)),
            None => Ok(None),
        }
    }
}
