use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Token;
use crate::config::{Config, OutputFormat};
use crate::jenkins::{CachePolicy, DataCache, JenkinsClient, PipelineGraph};
use crate::output::{export_reports, print_summary, PhaseProgress};
use crate::report::{PipelineReport, ReportEngine, ReportOptions, ReportStore};

#[derive(Parser)]
#[command(name = "pipeline-report")]
#[command(
    author,
    version,
    about = "Failure and timing reports for multi-stage Jenkins pipelines",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write exported reports to this file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Configuration file (defaults to ./pipeline-report.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or refresh) reports for builds or jobs
    Report {
        /// Build URLs (report their pipelines) or job URLs (report every
        /// pipeline the job started)
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        jenkins: JenkinsArgs,

        #[arg(long)]
        reports_directory: Option<PathBuf>,

        /// Also read the logs of successful builds
        #[arg(long, default_value_t = false)]
        analyze_successful_logs: bool,

        /// Read jobs from the data cache instead of re-fetching them first
        #[arg(long, default_value_t = false)]
        no_refresh: bool,

        /// Lines of context around interesting log lines
        #[arg(long)]
        context: Option<usize>,

        /// Leave steps shorter than this many seconds out of step timing
        #[arg(long)]
        step_threshold: Option<f64>,
    },

    /// Delete persisted reports
    Clear {
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        jenkins: JenkinsArgs,

        #[arg(long)]
        reports_directory: Option<PathBuf>,
    },
}

#[derive(Args)]
struct JenkinsArgs {
    #[arg(short, long, env = "JENKINS_USER")]
    user: Option<String>,

    #[arg(short, long, env = "JENKINS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Where raw Jenkins payloads are cached
    #[arg(long)]
    cache_directory: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn execute(&self, config: &Config) -> Result<()> {
        match &self.command {
            Commands::Report {
                urls,
                jenkins,
                reports_directory,
                analyze_successful_logs,
                no_refresh,
                context,
                step_threshold,
            } => {
                let options = ReportOptions {
                    analyze_successful_logs: *analyze_successful_logs
                        || config.report.analyze_successful_logs,
                    excerpt_context: context.unwrap_or(config.report.excerpt_context),
                    step_noise_threshold: step_threshold.unwrap_or(config.report.step_noise_threshold),
                };
                let mut engine =
                    create_engine(config, jenkins, reports_directory.as_deref(), options)?;
                self.execute_report(config, &mut engine, urls, !*no_refresh)
            }
            Commands::Clear {
                urls,
                jenkins,
                reports_directory,
            } => {
                let mut engine = create_engine(
                    config,
                    jenkins,
                    reports_directory.as_deref(),
                    ReportOptions::default(),
                )?;
                execute_clear(&mut engine, urls)
            }
        }
    }

    fn execute_report(
        &self,
        config: &Config,
        engine: &mut ReportEngine,
        urls: &[String],
        refresh: bool,
    ) -> Result<()> {
        info!("Reporting on {} URL(s)", urls.len());
        // Reports are always checked against live job data. Cached payloads
        // are only read back under --no-refresh.
        if refresh {
            engine.invalidate();
        }

        let progress = PhaseProgress::start_resolving(urls.len());
        let mut triggers = Vec::new();
        for url in urls {
            for trigger in engine
                .triggers_for(url)
                .with_context(|| format!("Failed to find the pipelines of {url}"))?
            {
                if !triggers.contains(&trigger) {
                    triggers.push(trigger);
                }
            }
        }

        let progress = progress.finish_resolving_start_generating(triggers.len());
        let mut reports: Vec<(String, PipelineReport)> = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let url = engine.graph().build_url(trigger);
            progress.set_generating(&url);
            let report = engine
                .report(trigger)
                .with_context(|| format!("Failed to generate the report for {url}"))?;
            reports.push((url, report));
        }
        info!("Reports are in {}", engine.store().directory().display());

        let progress = progress.finish_generating_start_writing();
        let format = self.format.unwrap_or(config.output.format);
        let pretty = self.pretty || config.output.pretty;
        let written = self.write_reports(&reports, format, pretty);
        progress.finish_writing();
        written
    }

    fn write_reports(
        &self,
        reports: &[(String, PipelineReport)],
        format: OutputFormat,
        pretty: bool,
    ) -> Result<()> {
        if format == OutputFormat::Summary {
            if let Some(path) = &self.output {
                warn!("Ignoring --output {} for the summary format", path.display());
            }
            print_summary(reports);
            return Ok(());
        }

        match &self.output {
            Some(path) => {
                let mut file = std::fs::File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                export_reports(reports, format, pretty, &mut file)?;
                info!("Reports written to: {}", path.display());
            }
            None => export_reports(reports, format, pretty, &mut std::io::stdout().lock())?,
        }
        Ok(())
    }
}

fn execute_clear(engine: &mut ReportEngine, urls: &[String]) -> Result<()> {
    let mut deleted = 0;
    for url in urls {
        deleted += engine
            .clear(url)
            .with_context(|| format!("Failed to clear the reports for {url}"))?;
    }
    eprintln!("Deleted {deleted} report(s) from {}", engine.store().directory().display());
    Ok(())
}

fn create_engine(
    config: &Config,
    jenkins: &JenkinsArgs,
    reports_directory: Option<&Path>,
    options: ReportOptions,
) -> Result<ReportEngine> {
    let user = jenkins.user.clone().or_else(|| config.jenkins.user.clone());
    let token = jenkins
        .token
        .clone()
        .or_else(|| config.jenkins.token.clone())
        .map(Token::from);
    let client = JenkinsClient::new(user, token)?.with_retries(
        config.jenkins.max_retries,
        Duration::from_secs(config.jenkins.retry_delay_secs),
    );

    let cache = if jenkins.no_cache || config.jenkins.no_cache {
        DataCache::disabled()
    } else {
        let directory = match jenkins
            .cache_directory
            .clone()
            .or_else(|| config.jenkins.cache_directory.clone())
        {
            Some(directory) => directory,
            None => DataCache::default_directory()?,
        };
        DataCache::new(
            directory,
            CachePolicy {
                console_text: config.jenkins.cache_console_text,
                ..CachePolicy::default()
            },
        )
    };

    let reports_directory = reports_directory.map_or_else(
        || config.report.reports_directory.clone(),
        Path::to_path_buf,
    );
    let graph = PipelineGraph::new(Box::new(client), cache);
    Ok(ReportEngine::new(graph, ReportStore::new(reports_directory), options))
}
