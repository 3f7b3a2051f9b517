use std::collections::HashSet;

use chrono::TimeDelta;
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::error::Result;
use crate::jenkins::links::{self, relative_path};
use crate::jenkins::{BuildId, BuildResult, JobId, PipelineGraph};

use super::acceptance::extract_acceptance;
use super::classifier::{classify, Classification};
use super::configuration::{categorize_run_types, configuration_summary};
use super::log_extractor::{extract_excerpts, extract_failed_in};
use super::store::ReportStore;
use super::timing::extract_steps;
use super::types::{Change, Excerpts, FailedIn, FailureCategory, PipelineReport, StageReport};

/// Name of the log excerpts are taken from.
pub const CONSOLE_TEXT: &str = "consoleText";

/// Queue delays shorter than this are not worth reporting.
const MIN_QUEUE_DELAY_SECS: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Read the logs of successful builds too (timing, acceptance tables).
    pub analyze_successful_logs: bool,
    /// Lines of context around each interesting log line.
    pub excerpt_context: usize,
    /// Step timing entries shorter than this many seconds are dropped.
    pub step_noise_threshold: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            analyze_successful_logs: false,
            excerpt_context: 2,
            step_noise_threshold: 10.0,
        }
    }
}

/// One stage of a pipeline: every attempt of one job, oldest first.
struct Stage {
    key: String,
    retries: Vec<BuildId>,
}

impl Stage {
    fn build(&self) -> BuildId {
        self.retries[self.retries.len() - 1]
    }

    fn first(&self) -> BuildId {
        self.retries[0]
    }
}

/// A matrix run of a stage build.
struct Run {
    key: String,
    build: BuildId,
    url: String,
    result: BuildResult,
}

/// Builds and incrementally refreshes pipeline reports.
///
/// A persisted report is reused as long as nothing it describes can have
/// changed: no part of it is in progress, its stages and runs are the ones
/// the graph currently shows, and successful logs were analyzed if that is
/// now requested. Stale parts are regenerated children first; fresh stage
/// and run reports are copied from the persisted report.
pub struct ReportEngine {
    graph: PipelineGraph,
    store: ReportStore,
    options: ReportOptions,
}

impl ReportEngine {
    pub fn new(graph: PipelineGraph, store: ReportStore, options: ReportOptions) -> Self {
        Self {
            graph,
            store,
            options,
        }
    }

    pub fn graph(&mut self) -> &mut PipelineGraph {
        &mut self.graph
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    /// Makes the next report re-read everything that may have changed on the
    /// server.
    pub fn invalidate(&mut self) {
        self.graph.invalidate();
    }

    /// Trigger builds behind a URL: the pipelines a build belongs to, or
    /// every pipeline a job started.
    pub fn triggers_for(&mut self, url: &str) -> Result<Vec<BuildId>> {
        if links::is_build_url(url) {
            let build = self.graph.build(url)?;
            self.graph.triggers(build)
        } else {
            let job = self.graph.job(url);
            self.graph.trigger_builds(job)
        }
    }

    /// Deletes persisted reports: one for a build URL, every trigger build's
    /// for a job URL. Returns how many were deleted.
    pub fn clear(&mut self, url: &str) -> Result<usize> {
        let urls = if links::is_build_url(url) {
            vec![url.to_string()]
        } else {
            self.triggers_for(url)?
                .into_iter()
                .map(|build| self.graph.build_url(build))
                .collect()
        };
        let mut deleted = 0;
        for url in urls {
            if self.store.delete(&url)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// The report of the pipeline started by `trigger`, regenerated if stale.
    pub fn report(&mut self, trigger: BuildId) -> Result<PipelineReport> {
        let url = self.graph.build_url(trigger);
        let cached = self.store.read(&url)?;
        let stages = self.discover_stages(trigger)?;

        if let Some(cached) = cached.as_ref() {
            if !self.pipeline_is_stale(cached, &stages)? {
                debug!("Report for {url} is up to date");
                return Ok(cached.clone());
            }
        }

        info!("Generating report for {url}");
        let report = self.generate_pipeline(trigger, &stages, cached.as_ref())?;
        self.store.write(&url, &report)?;
        Ok(report)
    }

    // Discovery

    fn discover_stages(&mut self, trigger: BuildId) -> Result<Vec<Stage>> {
        let mut stages = Vec::new();
        let mut seen = HashSet::new();
        self.collect_stages(trigger, &mut stages, &mut seen)?;
        Ok(stages)
    }

    fn collect_stages(
        &mut self,
        build: BuildId,
        stages: &mut Vec<Stage>,
        seen: &mut HashSet<BuildId>,
    ) -> Result<()> {
        let retries = self.graph.retries(build)?;
        let last = retries.last().copied().unwrap_or(build);
        if !seen.insert(last) {
            return Ok(());
        }

        let job = self.graph.build_job(last);
        let key = self.stage_key(job)?;
        debug!(
            "Stage {key}: build #{} after {} attempt(s)",
            self.graph.build_number(last),
            retries.len()
        );
        stages.push(Stage { key, retries });

        let mut next: IndexMap<JobId, BuildId> = IndexMap::new();
        for downstream in self.graph.downstreams(last)? {
            let downstream_job = self.graph.build_job(downstream);
            if downstream_job != job {
                next.entry(downstream_job).or_insert(downstream);
            }
        }
        for downstream in next.into_values() {
            self.collect_stages(downstream, stages, seen)?;
        }
        Ok(())
    }

    /// `http://jenkins/job/a/job/b/` → `a/job/b`
    fn stage_key(&self, job: JobId) -> Result<String> {
        let job_url = self.graph.job_url(job);
        let root = links::server_root(job_url)?;
        Ok(relative_path(job_url, &format!("{root}job/")))
    }

    /// Runs of a stage build, one per configuration, failures first.
    fn runs(&mut self, build: BuildId) -> Result<Vec<Run>> {
        let stage_job_url = self.graph.job_url(self.graph.build_job(build)).to_string();
        let mut runs: Vec<Run> = Vec::new();
        for run in self.graph.runs(build)? {
            let run_job_url = self.graph.job_url(self.graph.build_job(run)).to_string();
            let key = configuration_summary(&relative_path(&run_job_url, &stage_job_url));
            if runs.iter().any(|existing| existing.key == key) {
                debug!("Skipping second run for configuration {key}");
                continue;
            }
            runs.push(Run {
                key,
                build: run,
                url: self.graph.build_url(run),
                result: self.graph.result(run)?,
            });
        }
        runs.sort_by(|a, b| {
            (result_rank(&a.result), &a.url).cmp(&(result_rank(&b.result), &b.url))
        });
        Ok(runs)
    }

    // Staleness

    fn pipeline_is_stale(&mut self, cached: &PipelineReport, stages: &[Stage]) -> Result<bool> {
        if cached.result.is_in_progress() || self.logs_pending(cached) {
            return Ok(true);
        }

        let mut cached_urls: Vec<&str> = cached.stage_urls().collect();
        let mut urls: Vec<String> = stages.iter().map(|s| self.graph.build_url(s.build())).collect();
        cached_urls.sort_unstable();
        urls.sort_unstable();
        if cached_urls != urls {
            debug!("Stages of {} changed", cached.url);
            return Ok(true);
        }

        for stage in stages {
            if self.stage_is_stale(cached, stage)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether successful logs are wanted but the report was made without them.
    fn logs_pending(&self, cached: &PipelineReport) -> bool {
        self.options.analyze_successful_logs && cached.successful_logs_analyzed == Some(false)
    }

    fn report_is_stale(&self, report: &StageReport, logs_pending: bool) -> bool {
        report.result.is_in_progress() || (logs_pending && report.result.is_success())
    }

    fn cached_stage<'a>(
        &self,
        cached: &'a PipelineReport,
        stage: &Stage,
    ) -> Option<&'a StageReport> {
        let url = self.graph.build_url(stage.build());
        cached.stages.get(&stage.key).filter(|report| report.url == url)
    }

    fn stage_is_stale(&mut self, cached: &PipelineReport, stage: &Stage) -> Result<bool> {
        let Some(report) = self.cached_stage(cached, stage) else {
            return Ok(true);
        };
        let logs_pending = self.logs_pending(cached);
        if self.report_is_stale(report, logs_pending) {
            return Ok(true);
        }

        let runs = self.runs(stage.build())?;
        let mut cached_urls: Vec<&str> = report.runs().map(|(_, run)| run.url.as_str()).collect();
        let mut urls: Vec<&str> = runs.iter().map(|run| run.url.as_str()).collect();
        cached_urls.sort_unstable();
        urls.sort_unstable();
        if cached_urls != urls {
            return Ok(true);
        }

        Ok(runs.iter().any(|run| {
            report
                .runs
                .as_ref()
                .and_then(|cached_runs| cached_runs.get(&run.key))
                .filter(|cached_run| cached_run.url == run.url)
                .map_or(true, |cached_run| self.report_is_stale(cached_run, logs_pending))
        }))
    }

    // Generation

    fn generate_pipeline(
        &mut self,
        trigger: BuildId,
        stages: &[Stage],
        cached: Option<&PipelineReport>,
    ) -> Result<PipelineReport> {
        let mut stage_reports: IndexMap<String, StageReport> = IndexMap::new();
        for stage in stages {
            if stage_reports.contains_key(&stage.key) {
                warn!("Job {} appears twice in the pipeline, keeping the first", stage.key);
                continue;
            }
            let reusable = match cached {
                Some(cached) if !self.stage_is_stale(cached, stage)? => {
                    self.cached_stage(cached, stage).cloned()
                }
                _ => None,
            };
            let report = match reusable {
                Some(report) => report,
                None => {
                    let cached_stage = cached.and_then(|c| self.cached_stage(c, stage));
                    let logs_pending = cached.is_some_and(|c| self.logs_pending(c));
                    self.generate_stage(stage, cached_stage, logs_pending)?
                }
            };
            stage_reports.insert(stage.key.clone(), report);
        }

        let mut report = PipelineReport {
            result: pipeline_result(stage_reports.values()),
            url: self.graph.build_url(trigger),
            timestamp: self.graph.timestamp(trigger)?,
            triggered_by: self.graph.triggered_by(trigger)?,
            duration: None,
            active_duration: None,
            queue_delays: non_zero(stage_reports.values().filter_map(|s| s.queue_delay).sum()),
            retry_delays: non_zero(stage_reports.values().filter_map(|s| s.retry_delay).sum()),
            failure_category: None,
            failure_cause: None,
            parameters: self.graph.parameters(trigger)?,
            change: Change::default(),
            successful_logs_analyzed: (!self.options.analyze_successful_logs).then_some(false),
            stages: IndexMap::new(),
        };

        let mut latest_end = None;
        let mut active_duration = 0.0;
        for stage in stages {
            let build = stage.build();
            latest_end = latest_end.max(self.graph.end_timestamp(build)?);
            active_duration += self.graph.duration(build)?.unwrap_or(0.0);
            let parameters = self.graph.parameters(build)?;
            merge_change(&mut report.change, &parameters, &self.graph.build_url(build));
        }
        report.duration = latest_end.zip(report.timestamp).map(|(end, start)| seconds(end - start));
        report.active_duration = Some(active_duration);

        if let Some((category, cause)) = aggregate_failures(&stage_reports, false) {
            report.failure_category = Some(category);
            report.failure_cause = Some(cause);
        }
        report.stages = stage_reports;
        Ok(report)
    }

    fn generate_stage(
        &mut self,
        stage: &Stage,
        cached: Option<&StageReport>,
        logs_pending: bool,
    ) -> Result<StageReport> {
        let build = stage.build();
        let first = stage.first();
        debug!("Generating stage report for {}", self.graph.build_url(build));

        let mut report = StageReport::new(self.graph.result(build)?, self.graph.build_url(build));
        report.timestamp = self.graph.timestamp(build)?;
        let first_start = self.graph.timestamp(first)?;
        let end = self.graph.end_timestamp(build)?;
        report.duration = end.zip(first_start).map(|(end, start)| seconds(end - start));
        if stage.retries.len() > 1 {
            report.active_duration = self.graph.duration(build)?;
            report.retries = Some(stage.retries.len() - 1);
        }
        report.retry_delay = report
            .timestamp
            .zip(first_start)
            .map(|(last, first)| seconds(last - first))
            .filter(|delay| *delay != 0.0);

        self.analyze(build, &mut report)?;

        let runs = self.runs(build)?;
        let mut run_reports = IndexMap::new();
        let mut run_queue_delay: Option<f64> = None;
        for run in runs {
            let reusable = cached
                .and_then(|stage| stage.runs.as_ref())
                .and_then(|runs| runs.get(&run.key))
                .filter(|cached_run| cached_run.url == run.url)
                .filter(|cached_run| !self.report_is_stale(cached_run, logs_pending))
                .cloned();
            let run_report = match reusable {
                Some(run_report) => run_report,
                None => self.generate_run(&run, build)?,
            };
            if let Some(delay) = run_report.queue_delay {
                run_queue_delay = Some(run_queue_delay.map_or(delay, |longest| longest.max(delay)));
            }
            run_reports.insert(run.key, run_report);
        }

        report.queue_delay = self.stage_queue_delay(first, run_queue_delay)?;

        if !run_reports.is_empty() {
            if let Some((category, cause)) = aggregate_failures(&run_reports, true) {
                report.failure_category = Some(category);
                report.failure_cause = Some(cause);
            }
            report.runs = Some(run_reports);
        }
        fill_unknown_failure(&mut report);
        Ok(report)
    }

    fn generate_run(&mut self, run: &Run, stage_build: BuildId) -> Result<StageReport> {
        debug!("Generating run report for {}", run.url);
        let mut report = StageReport::new(run.result.clone(), run.url.clone());
        report.timestamp = self.graph.timestamp(run.build)?;
        let end = self.graph.end_timestamp(run.build)?;
        report.duration = end.zip(report.timestamp).map(|(end, start)| seconds(end - start));
        let stage_start = self.graph.timestamp(stage_build)?;
        report.queue_delay = report
            .timestamp
            .zip(stage_start)
            .map(|(run_start, stage_start)| seconds(run_start - stage_start))
            .filter(|delay| *delay >= MIN_QUEUE_DELAY_SECS);

        self.analyze(run.build, &mut report)?;
        fill_unknown_failure(&mut report);
        Ok(report)
    }

    /// Time between the end of the previous stage and the start of this one,
    /// or of its slowest-starting run.
    fn stage_queue_delay(&mut self, first: BuildId, run_queue_delay: Option<f64>) -> Result<Option<f64>> {
        let mut previous_end = None;
        for upstream in self.graph.upstreams(first)? {
            previous_end = previous_end.max(self.graph.end_timestamp(upstream)?);
        }
        let Some(previous_end) = previous_end else {
            return Ok(None);
        };
        let Some(start) = self.graph.timestamp(first)? else {
            return Ok(None);
        };

        let mut delay = seconds(start - previous_end);
        if let Some(run_delay) = run_queue_delay {
            delay = delay.max(run_delay);
        }
        Ok(Some(delay).filter(|delay| *delay >= MIN_QUEUE_DELAY_SECS))
    }

    /// Reads the console log of a finished build into the report: excerpts
    /// and structured failures (unless it succeeded), acceptance timing, step
    /// timing, and the failure classification.
    fn analyze(&mut self, build: BuildId, report: &mut StageReport) -> Result<()> {
        let result = report.result.clone();
        if result.is_in_progress() {
            return Ok(());
        }
        if result.is_success() && !self.options.analyze_successful_logs {
            return Ok(());
        }

        let Some(text) = self.graph.console_text(build)? else {
            debug!("No console text for {}", report.url);
            if !matches!(result, BuildResult::Failure) {
                set_classification(report, classify(&result, std::iter::empty(), &FailedIn::new()));
            }
            return Ok(());
        };
        let lines: Vec<&str> = text.lines().collect();

        let mut excerpts = Excerpts::new();
        let mut failed_in = FailedIn::new();
        if !result.is_success() {
            excerpts = extract_excerpts(&lines, self.options.excerpt_context);
            failed_in = extract_failed_in(&lines);
        }

        let acceptance = extract_acceptance(&lines);
        if !acceptance.timing.is_empty() {
            report.acceptance_timing = Some(acceptance.timing);
        }
        if !acceptance.failures.is_empty() {
            failed_in.insert("chef_acceptance".to_string(), acceptance.failures);
        }

        if let Some(start) = report.timestamp {
            let timing = extract_steps(
                &lines,
                start,
                self.graph.duration(build)?,
                self.options.step_noise_threshold,
            );
            report.steps = timing.steps;
            if let Some(step) = timing.last_omnibus_step.filter(|_| !result.is_success()) {
                failed_in.insert("omnibus".to_string(), vec![step]);
            }
        }

        let classification = classify(&result, excerpts.values().map(String::as_str), &failed_in);
        set_classification(report, classification);
        if !excerpts.is_empty() {
            report.logs = Some(IndexMap::from([(CONSOLE_TEXT.to_string(), excerpts)]));
        }
        if !failed_in.is_empty() {
            report.failed_in = Some(failed_in);
        }
        Ok(())
    }
}

fn set_classification(report: &mut StageReport, classification: Option<Classification>) {
    if let Some(classification) = classification {
        report.failure_category = Some(classification.category);
        report.failure_cause = Some(classification.cause);
    }
}

/// A failed report always says why, even if nothing was found.
fn fill_unknown_failure(report: &mut StageReport) {
    if report.result.is_failed() {
        report.failure_category.get_or_insert(FailureCategory::Unknown);
        report
            .failure_cause
            .get_or_insert_with(|| FailureCategory::Unknown.to_string());
    }
}

/// Failed first, then successful, then running.
fn result_rank(result: &BuildResult) -> u8 {
    match result {
        BuildResult::InProgress => 2,
        BuildResult::Success => 1,
        _ => 0,
    }
}

/// `IN PROGRESS` if anything is; otherwise a specific result such as
/// `ABORTED` beats `FAILURE`, which beats `SUCCESS`.
fn pipeline_result<'a>(stages: impl Iterator<Item = &'a StageReport>) -> BuildResult {
    let mut result = BuildResult::Success;
    for stage in stages {
        match &stage.result {
            BuildResult::InProgress => return BuildResult::InProgress,
            BuildResult::Success => {}
            BuildResult::Failure => {
                if result.is_success() {
                    result = BuildResult::Failure;
                }
            }
            other => result = other.clone(),
        }
    }
    result
}

/// Rolls failed children up into one category and cause.
///
/// The category is the most common one (the first seen wins ties). The
/// cause lists each distinct child cause with the children that hit it,
/// e.g. `network timeout example.com:443: el; yanked gem foo-1.0: ubuntu`.
/// With `compact`, children are configuration names and whole groups of
/// them collapse into the group name.
fn aggregate_failures(
    children: &IndexMap<String, StageReport>,
    compact: bool,
) -> Option<(FailureCategory, String)> {
    let failed: Vec<(&String, &StageReport)> = children
        .iter()
        .filter(|(_, child)| child.result.is_failed())
        .collect();
    if failed.is_empty() {
        return None;
    }

    let mut categories: IndexMap<FailureCategory, usize> = IndexMap::new();
    let mut causes: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, child) in &failed {
        let category = child.failure_category.clone().unwrap_or(FailureCategory::Unknown);
        *categories.entry(category).or_default() += 1;
        let cause = child.failure_cause.clone().unwrap_or_else(|| "unknown".to_string());
        causes.entry(cause).or_default().push((*key).clone());
    }

    let mut category = FailureCategory::Unknown;
    let mut best = 0;
    for (candidate, count) in categories {
        if count > best {
            best = count;
            category = candidate;
        }
    }

    let all: Vec<String> = children.keys().cloned().collect();
    let cause = causes
        .into_iter()
        .map(|(cause, keys)| {
            let keys = if compact { categorize_run_types(&keys, &all) } else { keys };
            format!("{cause}: {}", keys.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some((category, cause))
}

/// Fills the change from a stage build's parameters. The first value seen
/// for each field wins.
fn merge_change(change: &mut Change, parameters: &IndexMap<String, String>, build_url: &str) {
    let fields = [
        ("GIT_COMMIT", &mut change.git_commit),
        ("PROJECT", &mut change.project),
        ("OMNIBUS_BUILD_VERSION", &mut change.version),
    ];
    for (parameter, slot) in fields {
        let Some(value) = parameters.get(parameter).filter(|v| !v.is_empty()) else {
            continue;
        };
        match slot.as_deref() {
            None => *slot = Some(value.clone()),
            Some(existing) if existing != value.as_str() => warn!(
                "More than one {parameter} in pipeline: kept {existing}, {build_url} has {value}"
            ),
            Some(_) => {}
        }
    }
}

fn non_zero(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}
