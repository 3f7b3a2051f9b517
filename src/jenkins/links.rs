use std::path::PathBuf;

use url::Url;

use crate::error::{ReportError, Result};

/// Returns the Jenkins root for any job or build URL.
///
/// The root is everything before the first `/job/` segment, so servers
/// mounted under a prefix (e.g. <https://ci.example.com/jenkins/>) work.
pub fn server_root(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| ReportError::InvalidUrl(format!("{url}: {e}")))?;
    let path = parsed.path();
    let prefix = path.find("/job/").map_or(path, |index| &path[..index]);
    let origin = parsed.origin().ascii_serialization();
    Ok(format!("{origin}{}/", prefix.trim_end_matches('/')))
}

/// Normalizes a job URL so it always ends in a slash.
pub fn normalize_job_url(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

/// Splits `http://host/job/my-job/12/` into (`http://host/job/my-job/`, 12).
pub fn split_build_url(url: &str) -> Result<(String, u64)> {
    let trimmed = url.trim_end_matches('/');
    let (job, number) = trimmed
        .rsplit_once('/')
        .ok_or_else(|| ReportError::InvalidUrl(url.to_string()))?;
    let number = number
        .parse()
        .map_err(|_| ReportError::InvalidUrl(format!("{url}: not a build URL")))?;
    Ok((normalize_job_url(job), number))
}

/// Whether the URL names a build (its last path segment is a number).
pub fn is_build_url(url: &str) -> bool {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .is_some_and(|last| !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()))
}

pub fn build_url(job_url: &str, number: u64) -> String {
    format!("{job_url}{number}/")
}

/// Resolves a cause's `upstreamUrl` (`job/my-job/`) against the server root.
pub fn resolve_upstream(root: &str, upstream_url: &str) -> String {
    normalize_job_url(&format!("{root}{}", upstream_url.trim_start_matches('/')))
}

/// URL of a job that lives next to `job_url` (same folder).
pub fn sibling_job_url(job_url: &str, name: &str) -> String {
    let trimmed = job_url.trim_end_matches('/');
    let parent = trimmed.rsplit_once('/').map_or(trimmed, |(parent, _)| parent);
    normalize_job_url(&format!("{parent}/{name}"))
}

/// Path of a job below another URL, without slashes at either end.
///
/// `relative_path("http://h/job/a/job/b/", "http://h/job/")` is `a/job/b`.
pub fn relative_path(url: &str, base: &str) -> String {
    url.strip_prefix(base)
        .unwrap_or(url)
        .trim_matches('/')
        .to_string()
}

/// Filesystem-safe relative path for a URL: `<host>/<path>[.<extension>]`.
///
/// The mapping is stable, so writing the same URL twice overwrites the
/// same file.
pub fn cache_filename(url: &str, extension: Option<&str>) -> Result<PathBuf> {
    let parsed = Url::parse(url).map_err(|e| ReportError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ReportError::InvalidUrl(format!("{url}: no host")))?;
    let host = match parsed.port() {
        Some(port) => format!("{host}-{port}"),
        None => host.to_string(),
    };

    let mut filename = format!("{host}{}", parsed.path().trim_end_matches('/'));
    if let Some(extension) = extension {
        filename.push('.');
        filename.push_str(extension);
    }

    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/') {
                c
            } else {
                '-'
            }
        })
        .collect();

    // Never let a URL climb out of the cache directory.
    let safe = safe
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/");

    Ok(PathBuf::from(safe))
}
