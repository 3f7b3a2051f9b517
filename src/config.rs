use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::jenkins::client::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECONDS};

/// Configuration file structure for pipeline-report.
///
/// Every value can also be given on the command line; flags win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JenkinsConfig {
    /// Jenkins user name for basic auth
    pub user: Option<String>,

    /// Jenkins API token
    pub token: Option<String>,

    /// Where raw Jenkins payloads are cached (platform cache dir by default)
    pub cache_directory: Option<PathBuf>,

    /// Disable the payload cache entirely
    #[serde(default)]
    pub no_cache: bool,

    /// Also cache console logs of finished builds
    #[serde(default)]
    pub cache_console_text: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportConfig {
    /// Where pipeline reports are persisted
    #[serde(default = "default_reports_directory")]
    pub reports_directory: PathBuf,

    /// Analyze the logs of successful builds as well
    #[serde(default)]
    pub analyze_successful_logs: bool,

    /// Lines of context around interesting log lines
    #[serde(default = "default_excerpt_context")]
    pub excerpt_context: usize,

    /// Steps shorter than this (seconds) are left out of step timing
    #[serde(default = "default_step_noise_threshold")]
    pub step_noise_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Yaml,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            user: None,
            token: None,
            cache_directory: None,
            no_cache: false,
            cache_console_text: false,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reports_directory: default_reports_directory(),
            analyze_successful_logs: false,
            excerpt_context: default_excerpt_context(),
            step_noise_threshold: default_step_noise_threshold(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECONDS
}

fn default_reports_directory() -> PathBuf {
    PathBuf::from("reports")
}

fn default_excerpt_context() -> usize {
    2
}

fn default_step_noise_threshold() -> f64 {
    10.0
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipeline-report.toml
    /// 3. ./pipeline-report.json
    /// 4. ./pipeline-report.yaml
    /// 5. ./pipeline-report.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "pipeline-report.toml",
            "pipeline-report.json",
            "pipeline-report.yaml",
            "pipeline-report.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}
