use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use log::debug;

use crate::error::{ReportError, Result};

use super::cache::{CacheKind, DataCache};
use super::links;
use super::types::{BuildData, BuildResult, JobData, DELETED};
use super::JenkinsApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildId(usize);

/// A payload plus the cache version it was loaded at.
#[derive(Debug)]
struct Loaded<T> {
    value: T,
    cache_version: u64,
}

#[derive(Debug)]
struct JobNode {
    url: String,
    /// `Some(None)` once loaded from a server that no longer has the job
    loaded: Option<Loaded<Option<JobData>>>,
    builds: HashMap<u64, BuildId>,
}

#[derive(Debug)]
struct BuildNode {
    job: JobId,
    number: u64,
    data: Option<Loaded<BuildData>>,
    upstreams: Vec<BuildId>,
    retry_of: Vec<BuildId>,
    downstreams: Vec<BuildId>,
    runs: Option<RunsEntry>,
}

#[derive(Debug)]
struct RunsEntry {
    runs: Loaded<Vec<BuildId>>,
    volatile: bool,
}

/// Arena of Jenkins jobs and builds, addressed by [`JobId`] / [`BuildId`].
///
/// Every object is created once per identity and filled lazily from the
/// [`JenkinsApi`]. Loaded payloads carry the cache version they were read
/// at; [`PipelineGraph::invalidate`] bumps the version so the next access
/// re-fetches. Completed builds never change, so only in-progress builds and
/// job listings are re-read after an invalidation.
pub struct PipelineGraph {
    api: Box<dyn JenkinsApi>,
    cache: DataCache,
    cache_version: u64,
    jobs: Vec<JobNode>,
    job_index: HashMap<String, JobId>,
    builds: Vec<BuildNode>,
}

impl PipelineGraph {
    pub fn new(api: Box<dyn JenkinsApi>, cache: DataCache) -> Self {
        Self {
            api,
            cache,
            cache_version: 0,
            jobs: Vec::new(),
            job_index: HashMap::new(),
            builds: Vec::new(),
        }
    }

    /// Forces the next access of every job, in-progress build and run list
    /// to re-fetch. Disk-cached payloads are not consulted afterwards.
    pub fn invalidate(&mut self) {
        self.cache_version += 1;
        debug!("Graph cache version is now {}", self.cache_version);
    }

    // Identity

    pub fn job(&mut self, url: &str) -> JobId {
        let url = links::normalize_job_url(url);
        if let Some(&id) = self.job_index.get(&url) {
            return id;
        }
        let id = JobId(self.jobs.len());
        self.jobs.push(JobNode {
            url: url.clone(),
            loaded: None,
            builds: HashMap::new(),
        });
        self.job_index.insert(url, id);
        id
    }

    pub fn build_in(&mut self, job: JobId, number: u64) -> BuildId {
        if let Some(&id) = self.jobs[job.0].builds.get(&number) {
            return id;
        }
        let id = BuildId(self.builds.len());
        self.builds.push(BuildNode {
            job,
            number,
            data: None,
            upstreams: Vec::new(),
            retry_of: Vec::new(),
            downstreams: Vec::new(),
            runs: None,
        });
        self.jobs[job.0].builds.insert(number, id);
        id
    }

    pub fn build(&mut self, url: &str) -> Result<BuildId> {
        let (job_url, number) = links::split_build_url(url)?;
        let job = self.job(&job_url);
        Ok(self.build_in(job, number))
    }

    pub fn job_url(&self, job: JobId) -> &str {
        &self.jobs[job.0].url
    }

    pub fn build_url(&self, build: BuildId) -> String {
        let node = &self.builds[build.0];
        links::build_url(&self.jobs[node.job.0].url, node.number)
    }

    pub fn build_job(&self, build: BuildId) -> JobId {
        self.builds[build.0].job
    }

    pub fn build_number(&self, build: BuildId) -> u64 {
        self.builds[build.0].number
    }

    // Loading

    /// Loads (or re-loads, if stale) a job and registers the cause edges of
    /// every build it lists.
    pub fn load_job(&mut self, job: JobId) -> Result<()> {
        if self.jobs[job.0]
            .loaded
            .as_ref()
            .is_some_and(|loaded| loaded.cache_version == self.cache_version)
        {
            return Ok(());
        }

        let url = self.jobs[job.0].url.clone();
        let cached = if self.cache_version == 0 {
            self.cache.read_json::<JobData>(&url, CacheKind::Job)
        } else {
            None
        };
        let from_disk = cached.is_some();
        let data = match cached {
            Some(data) => Some(data),
            None => self.api.fetch_job(&url)?,
        };

        let previous = self.jobs[job.0]
            .loaded
            .as_ref()
            .and_then(|loaded| loaded.value.as_ref())
            .and_then(|data| data.next_build_number);
        if let (Some(previous), Some(current)) =
            (previous, data.as_ref().and_then(|d| d.next_build_number))
        {
            if current < previous {
                return Err(ReportError::JobRecreated {
                    url,
                    previous,
                    current,
                });
            }
        }

        match &data {
            Some(data) => {
                for build in &data.all_builds {
                    self.register_build(job, build.clone())?;
                }
                if !from_disk && !data.is_volatile() {
                    self.cache.write_json(&url, CacheKind::Job, data)?;
                }
            }
            None => debug!("Job {url} does not exist"),
        }

        self.jobs[job.0].loaded = Some(Loaded {
            value: data,
            cache_version: self.cache_version,
        });
        Ok(())
    }

    /// Stores a build payload and registers its upstream, retry and
    /// downstream edges.
    fn register_build(&mut self, job: JobId, data: BuildData) -> Result<BuildId> {
        let id = self.build_in(job, data.number);

        if let Some(previous) = self.builds[id.0].data.as_ref().and_then(|d| d.value.timestamp) {
            if let Some(current) = data.timestamp {
                if previous != current {
                    return Err(ReportError::BuildRecreated {
                        url: self.build_url(id),
                        previous,
                        current,
                    });
                }
            }
        }

        let root = links::server_root(&self.jobs[job.0].url)?;
        let causes: Vec<(String, u64)> = data
            .causes()
            .filter_map(|cause| Some((cause.upstream_url.clone()?, cause.upstream_build?)))
            .collect();

        self.builds[id.0].data = Some(Loaded {
            value: data,
            cache_version: self.cache_version,
        });

        for (upstream_url, number) in causes {
            let upstream_job = self.job(&links::resolve_upstream(&root, &upstream_url));
            let upstream = self.build_in(upstream_job, number);
            if upstream == id {
                continue;
            }
            let node = &mut self.builds[id.0];
            let edges = if upstream_job == job {
                &mut node.retry_of
            } else {
                &mut node.upstreams
            };
            if !edges.contains(&upstream) {
                edges.push(upstream);
            }
            self.add_downstream(upstream, id);
        }

        Ok(id)
    }

    fn add_downstream(&mut self, build: BuildId, downstream: BuildId) {
        if self.builds[build.0].downstreams.contains(&downstream) {
            return;
        }
        let mut downstreams = std::mem::take(&mut self.builds[build.0].downstreams);
        downstreams.push(downstream);
        downstreams.sort_by_key(|b| (self.builds[b.0].job, self.builds[b.0].number));
        self.builds[build.0].downstreams = downstreams;
    }

    /// Makes sure a build has data if the server has any. In-progress builds
    /// loaded before the last invalidation are re-read through their job.
    fn ensure_build(&mut self, build: BuildId) -> Result<()> {
        let fresh = self.builds[build.0].data.as_ref().is_some_and(|loaded| {
            loaded.value.result.is_some() || loaded.cache_version == self.cache_version
        });
        if !fresh {
            self.load_job(self.builds[build.0].job)?;
        }
        Ok(())
    }

    fn data(&self, build: BuildId) -> Option<&BuildData> {
        self.builds[build.0].data.as_ref().map(|loaded| &loaded.value)
    }

    pub fn build_data(&mut self, build: BuildId) -> Result<Option<&BuildData>> {
        self.ensure_build(build)?;
        Ok(self.data(build))
    }

    /// Whether the build is a placeholder: its job is gone or no longer
    /// lists it.
    pub fn is_missing(&mut self, build: BuildId) -> Result<bool> {
        Ok(self.build_data(build)?.is_none())
    }

    // Attributes

    pub fn result(&mut self, build: BuildId) -> Result<BuildResult> {
        Ok(self
            .build_data(build)?
            .map_or_else(|| BuildResult::Other(DELETED.to_string()), BuildData::result))
    }

    pub fn timestamp(&mut self, build: BuildId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.build_data(build)?.and_then(BuildData::timestamp))
    }

    /// Duration in seconds; `None` while in progress.
    pub fn duration(&mut self, build: BuildId) -> Result<Option<f64>> {
        Ok(self.build_data(build)?.and_then(BuildData::duration_secs))
    }

    pub fn end_timestamp(&mut self, build: BuildId) -> Result<Option<DateTime<Utc>>> {
        let Some(data) = self.build_data(build)? else {
            return Ok(None);
        };
        if data.result.is_none() {
            return Ok(None);
        }
        let start = data.timestamp();
        let duration = data.duration.and_then(TimeDelta::try_milliseconds);
        Ok(start
            .zip(duration)
            .and_then(|(start, duration)| start.checked_add_signed(duration)))
    }

    pub fn triggered_by(&mut self, build: BuildId) -> Result<Option<String>> {
        Ok(self
            .build_data(build)?
            .and_then(BuildData::triggered_by)
            .map(str::to_string))
    }

    pub fn parameters(&mut self, build: BuildId) -> Result<IndexMap<String, String>> {
        Ok(self
            .build_data(build)?
            .map(BuildData::parameters)
            .unwrap_or_default())
    }

    // Relationships

    /// Builds in *other* jobs whose completion started this one.
    pub fn upstreams(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        self.ensure_build(build)?;
        let upstreams = self.builds[build.0].upstreams.clone();
        self.check_single_job(build, &upstreams)?;
        Ok(upstreams)
    }

    /// Earlier builds of the same job that this build re-ran.
    pub fn retry_of(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        self.ensure_build(build)?;
        Ok(self.builds[build.0].retry_of.clone())
    }

    /// Builds started by this one, in any job. Loads every downstream project
    /// of the build's job so the list is complete as of the current version.
    pub fn downstreams(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        let job = self.builds[build.0].job;
        self.load_job(job)?;
        for url in self.downstream_project_urls(job) {
            let downstream_job = self.job(&url);
            self.load_job(downstream_job)?;
        }
        Ok(self.builds[build.0].downstreams.clone())
    }

    fn same_job_downstreams(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        let job = self.builds[build.0].job;
        self.load_job(job)?;
        Ok(self.builds[build.0]
            .downstreams
            .iter()
            .copied()
            .filter(|d| self.builds[d.0].job == job)
            .collect())
    }

    fn downstream_project_urls(&self, job: JobId) -> Vec<String> {
        let job_url = &self.jobs[job.0].url;
        self.jobs[job.0]
            .loaded
            .as_ref()
            .and_then(|loaded| loaded.value.as_ref())
            .map(|data| {
                data.downstream_projects
                    .iter()
                    .map(|project| match &project.url {
                        Some(url) => links::normalize_job_url(url),
                        None => links::sibling_job_url(job_url, &project.name),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The builds that triggered this build's set of retries: its upstreams
    /// plus the upstreams of every build it (transitively) retried.
    pub fn parents(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        let mut parents = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![build];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            for upstream in self.upstreams(current)? {
                if !parents.contains(&upstream) {
                    parents.push(upstream);
                }
            }
            stack.extend(self.retry_of(current)?);
        }
        self.check_single_job(build, &parents)?;
        Ok(parents)
    }

    /// Every attempt of this build's stage, oldest first. The last element is
    /// the canonical attempt.
    pub fn retries(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        let job = self.builds[build.0].job;
        let parents = self.parents(build)?;

        let mut stack = vec![build];
        if parents.is_empty() {
            stack.push(self.root_retry(build)?);
        } else {
            for parent in parents {
                for downstream in self.downstreams(parent)? {
                    if self.builds[downstream.0].job == job {
                        stack.push(downstream);
                    }
                }
            }
        }

        let mut retries = Vec::new();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if current == build || !self.is_missing(current)? {
                retries.push(current);
            }
            stack.extend(self.same_job_downstreams(current)?);
        }

        retries.sort_by_key(|b| self.builds[b.0].number);
        Ok(retries)
    }

    fn root_retry(&mut self, build: BuildId) -> Result<BuildId> {
        let mut current = build;
        let mut seen = HashSet::from([build]);
        while let Some(&previous) = self.retry_of(current)?.first() {
            if !seen.insert(previous) {
                break;
            }
            current = previous;
        }
        Ok(current)
    }

    /// The upstream-most builds that (transitively) caused this one. Never
    /// empty: a build whose upstreams are missing or cyclic is its own trigger.
    pub fn triggers(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        let mut triggers = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![build];

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            self.ensure_build(current)?;
            let node = &self.builds[current.0];
            let next = if node.upstreams.is_empty() {
                node.retry_of.clone()
            } else {
                node.upstreams.clone()
            };

            let mut live = Vec::new();
            for candidate in next {
                if !self.is_missing(candidate)? {
                    live.push(candidate);
                }
            }

            if live.is_empty() {
                if !triggers.contains(&current) {
                    triggers.push(current);
                }
            } else {
                stack.extend(live.into_iter().rev());
            }
        }

        if triggers.is_empty() {
            triggers.push(build);
        }
        Ok(triggers)
    }

    /// Matrix runs of a build. Only runs with the parent's build number are
    /// kept; Jenkins lists each configuration's latest run even when it
    /// belongs to another build.
    pub fn runs(&mut self, build: BuildId) -> Result<Vec<BuildId>> {
        if let Some(entry) = &self.builds[build.0].runs {
            if !entry.volatile || entry.runs.cache_version == self.cache_version {
                return Ok(entry.runs.value.clone());
            }
        }

        let job = self.builds[build.0].job;
        self.load_job(job)?;
        let is_matrix = self.jobs[job.0]
            .loaded
            .as_ref()
            .and_then(|loaded| loaded.value.as_ref())
            .is_some_and(|data| !data.active_configurations.is_empty());

        let mut ids = Vec::new();
        let mut volatile = false;
        if is_matrix {
            let url = self.build_url(build);
            let number = self.builds[build.0].number;
            let cached = if self.cache_version == 0 {
                self.cache.read_json::<Vec<BuildData>>(&url, CacheKind::Runs)
            } else {
                None
            };
            let from_disk = cached.is_some();
            let runs: Vec<BuildData> = match cached {
                Some(runs) => runs,
                None => self.api.fetch_build_runs(&url)?,
            }
            .into_iter()
            .filter(|run| run.number == number)
            .collect();

            volatile = self.result(build)?.is_in_progress() || runs.iter().any(|r| r.result.is_none());
            if !from_disk && !volatile {
                self.cache.write_json(&url, CacheKind::Runs, &runs)?;
            }

            for run in runs {
                let (run_job_url, _) = links::split_build_url(&run.url)?;
                let run_job = self.job(&run_job_url);
                ids.push(self.register_build(run_job, run)?);
            }
        }

        self.builds[build.0].runs = Some(RunsEntry {
            runs: Loaded {
                value: ids.clone(),
                cache_version: self.cache_version,
            },
            volatile,
        });
        Ok(ids)
    }

    /// Console log of a build, or `None` if it is gone. Complete logs may be
    /// cached on disk.
    pub fn console_text(&mut self, build: BuildId) -> Result<Option<String>> {
        let url = self.build_url(build);
        if let Some(text) = self.cache.read_text(&url) {
            return Ok(Some(text));
        }
        let text = self.api.fetch_console_text(&url)?;
        if let Some(text) = &text {
            if !self.result(build)?.is_in_progress() {
                self.cache.write_text(&url, text)?;
            }
        }
        Ok(text)
    }

    /// Every build the job lists, by ascending number.
    pub fn job_builds(&mut self, job: JobId) -> Result<Vec<BuildId>> {
        self.load_job(job)?;
        let mut numbers: Vec<u64> = self.jobs[job.0]
            .loaded
            .as_ref()
            .and_then(|loaded| loaded.value.as_ref())
            .map(|data| data.all_builds.iter().map(|b| b.number).collect())
            .unwrap_or_default();
        numbers.sort_unstable();
        Ok(numbers
            .into_iter()
            .map(|number| self.build_in(job, number))
            .collect())
    }

    /// Builds of the job that nothing else started.
    pub fn trigger_builds(&mut self, job: JobId) -> Result<Vec<BuildId>> {
        let mut triggers = Vec::new();
        for build in self.job_builds(job)? {
            self.ensure_build(build)?;
            let node = &self.builds[build.0];
            if node.upstreams.is_empty() && node.retry_of.is_empty() {
                triggers.push(build);
            }
        }
        Ok(triggers)
    }

    fn check_single_job(&self, build: BuildId, builds: &[BuildId]) -> Result<()> {
        let mut jobs: Vec<JobId> = builds.iter().map(|b| self.builds[b.0].job).collect();
        jobs.sort_unstable();
        jobs.dedup();
        if jobs.len() > 1 {
            return Err(ReportError::MultipleUpstreamJobs {
                url: self.build_url(build),
                jobs: jobs.iter().map(|j| self.jobs[j.0].url.clone()).collect(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jenkins::cache::CachePolicy;
    use crate::jenkins::fake::{build_url, caused_by, create_build, job_url, FakeJenkins};
    use tempfile::TempDir;

    fn create_graph(fake: &FakeJenkins) -> PipelineGraph {
        PipelineGraph::new(Box::new(fake.clone()), DataCache::disabled())
    }

    /// trigger #1 → build #1 → test #1 (failed), test #2 (retry of #1, same upstream)
    fn create_retry_pipeline() -> FakeJenkins {
        let fake = FakeJenkins::new();
        fake.set_job("trigger", &["build"], vec![create_build("trigger", 1, Some("SUCCESS"), 5)]);
        fake.set_job(
            "build",
            &["test"],
            vec![caused_by(create_build("build", 1, Some("SUCCESS"), 60), "trigger", 1)],
        );
        let first = caused_by(create_build("test", 1, Some("FAILURE"), 60), "build", 1);
        let retry = caused_by(
            caused_by(create_build("test", 2, Some("SUCCESS"), 60), "build", 1),
            "test",
            1,
        );
        fake.set_job("test", &[], vec![first, retry]);
        fake
    }

    mod identity_tests {
        use super::*;

        #[test]
        fn test_factories_are_idempotent() {
            let fake = FakeJenkins::new();
            let mut graph = create_graph(&fake);

            let a = graph.job("http://jenkins.example.com/job/build");
            let b = graph.job("http://jenkins.example.com/job/build/");
            let first = graph.build(&build_url("build", 4)).unwrap();
            let second = graph.build_in(a, 4);

            assert_eq!(a, b, "trailing slash must not create a second job");
            assert_eq!(first, second);
            assert_eq!(graph.build_url(first), build_url("build", 4));
        }
    }

    mod relationship_tests {
        use super::*;

        #[test]
        fn test_retry_versus_new_stage() {
            // Arrange
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("build", 1)).unwrap();
            let first = graph.build(&build_url("test", 1)).unwrap();
            let retry = graph.build(&build_url("test", 2)).unwrap();

            // Act
            let upstreams = graph.upstreams(retry).unwrap();
            let retry_of = graph.retry_of(retry).unwrap();
            let retries = graph.retries(retry).unwrap();

            // Assert
            assert_eq!(upstreams, vec![build], "a different job is an upstream");
            assert_eq!(retry_of, vec![first], "the same job is a retry, not an upstream");
            assert_eq!(retries, vec![first, retry]);
            assert!(!retries.contains(&build));
        }

        #[test]
        fn test_retries_agree_from_every_member() {
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let first = graph.build(&build_url("test", 1)).unwrap();
            let retry = graph.build(&build_url("test", 2)).unwrap();

            let from_first = graph.retries(first).unwrap();
            let from_retry = graph.retries(retry).unwrap();

            assert_eq!(from_first, from_retry);
            assert_eq!(from_first.last(), Some(&retry), "last retry is canonical");
        }

        #[test]
        fn test_downstream_edges_are_registered() {
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("build", 1)).unwrap();

            let downstreams = graph.downstreams(build).unwrap();

            let urls: Vec<String> = downstreams.iter().map(|b| graph.build_url(*b)).collect();
            assert_eq!(urls, vec![build_url("test", 1), build_url("test", 2)]);
        }

        #[test]
        fn test_retries_without_parents() {
            let fake = FakeJenkins::new();
            fake.set_job(
                "solo",
                &[],
                vec![
                    create_build("solo", 1, Some("FAILURE"), 10),
                    caused_by(create_build("solo", 2, Some("FAILURE"), 10), "solo", 1),
                    caused_by(create_build("solo", 3, Some("SUCCESS"), 10), "solo", 2),
                    create_build("solo", 4, Some("SUCCESS"), 10),
                ],
            );
            let mut graph = create_graph(&fake);
            let middle = graph.build(&build_url("solo", 2)).unwrap();

            let numbers: Vec<u64> = graph
                .retries(middle)
                .unwrap()
                .into_iter()
                .map(|b| graph.build_number(b))
                .collect();

            assert_eq!(numbers, vec![1, 2, 3], "build 4 is an unrelated run");
        }

        #[test]
        fn test_multiple_upstream_jobs_is_an_error() {
            let fake = FakeJenkins::new();
            fake.set_job("a", &[], vec![create_build("a", 1, Some("SUCCESS"), 1)]);
            fake.set_job("b", &[], vec![create_build("b", 1, Some("SUCCESS"), 1)]);
            let both = caused_by(caused_by(create_build("c", 1, Some("SUCCESS"), 1), "a", 1), "b", 1);
            fake.set_job("c", &[], vec![both]);
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("c", 1)).unwrap();

            let result = graph.upstreams(build);

            assert!(matches!(result, Err(ReportError::MultipleUpstreamJobs { .. })));
        }
    }

    mod trigger_tests {
        use super::*;

        #[test]
        fn test_triggers_follow_upstreams_and_retries() {
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let trigger = graph.build(&build_url("trigger", 1)).unwrap();
            let retry = graph.build(&build_url("test", 2)).unwrap();

            assert_eq!(graph.triggers(retry).unwrap(), vec![trigger]);
            assert_eq!(graph.triggers(trigger).unwrap(), vec![trigger]);
        }

        #[test]
        fn test_missing_upstream_makes_build_its_own_trigger() {
            let fake = FakeJenkins::new();
            fake.set_job(
                "orphan",
                &[],
                vec![caused_by(create_build("orphan", 3, Some("SUCCESS"), 1), "deleted-job", 9)],
            );
            let mut graph = create_graph(&fake);
            let orphan = graph.build(&build_url("orphan", 3)).unwrap();

            let triggers = graph.triggers(orphan).unwrap();

            assert_eq!(triggers, vec![orphan]);
            let upstream = graph.upstreams(orphan).unwrap()[0];
            assert_eq!(graph.result(upstream).unwrap().as_str(), DELETED);
            assert_eq!(graph.timestamp(upstream).unwrap(), None);
        }

        #[test]
        fn test_cyclic_causes_terminate() {
            let fake = FakeJenkins::new();
            fake.set_job("x", &[], vec![caused_by(create_build("x", 1, Some("SUCCESS"), 1), "y", 1)]);
            fake.set_job("y", &[], vec![caused_by(create_build("y", 1, Some("SUCCESS"), 1), "x", 1)]);
            let mut graph = create_graph(&fake);
            let x = graph.build(&build_url("x", 1)).unwrap();

            let triggers = graph.triggers(x).unwrap();

            assert!(!triggers.is_empty(), "triggers must never be empty");
        }
    }

    mod cache_tests {
        use super::*;

        #[test]
        fn test_loads_once_per_version() {
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("test", 1)).unwrap();

            graph.result(build).unwrap();
            graph.retries(build).unwrap();
            assert_eq!(fake.job_fetches(&job_url("test")), 1);

            graph.invalidate();
            let upstream = graph.build(&build_url("build", 1)).unwrap();
            graph.downstreams(upstream).unwrap();
            assert_eq!(fake.job_fetches(&job_url("test")), 2, "invalidation forces a re-fetch");
        }

        #[test]
        fn test_in_progress_build_converges() {
            let fake = FakeJenkins::new();
            fake.set_job("slow", &[], vec![create_build("slow", 1, None, 0)]);
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("slow", 1)).unwrap();
            assert!(graph.result(build).unwrap().is_in_progress());

            fake.set_job("slow", &[], vec![create_build("slow", 1, Some("FAILURE"), 30)]);
            assert!(
                graph.result(build).unwrap().is_in_progress(),
                "no re-fetch without invalidation"
            );

            graph.invalidate();
            assert_eq!(graph.result(build).unwrap(), BuildResult::Failure);
            assert_eq!(graph.duration(build).unwrap(), Some(30.0));
        }

        #[test]
        fn test_completed_build_is_not_refetched() {
            let fake = FakeJenkins::new();
            fake.set_job("done", &[], vec![create_build("done", 1, Some("SUCCESS"), 30)]);
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("done", 1)).unwrap();
            graph.result(build).unwrap();

            graph.invalidate();
            graph.result(build).unwrap();

            assert_eq!(fake.job_fetches(&job_url("done")), 1);
        }

        #[test]
        fn test_job_recreated_is_fatal() {
            let fake = FakeJenkins::new();
            fake.set_job("phoenix", &[], vec![create_build("phoenix", 5, Some("SUCCESS"), 1)]);
            let mut graph = create_graph(&fake);
            let job = graph.job(&job_url("phoenix"));
            graph.load_job(job).unwrap();

            fake.set_job("phoenix", &[], vec![create_build("phoenix", 1, Some("SUCCESS"), 1)]);
            graph.invalidate();
            let result = graph.load_job(job);

            assert!(matches!(
                result,
                Err(ReportError::JobRecreated { previous: 6, current: 2, .. })
            ));
        }

        #[test]
        fn test_changed_build_timestamp_is_fatal() {
            let fake = FakeJenkins::new();
            fake.set_job("phoenix", &[], vec![create_build("phoenix", 1, Some("SUCCESS"), 1)]);
            let mut graph = create_graph(&fake);
            let job = graph.job(&job_url("phoenix"));
            graph.load_job(job).unwrap();

            let mut moved = create_build("phoenix", 1, Some("SUCCESS"), 1);
            moved.timestamp = moved.timestamp.map(|t| t + 1);
            fake.set_job("phoenix", &[], vec![moved]);
            graph.invalidate();

            assert!(matches!(graph.load_job(job), Err(ReportError::BuildRecreated { .. })));
        }

        #[test]
        fn test_disk_cache_is_used_before_first_invalidation() {
            // Arrange
            let temp_dir = TempDir::new().unwrap();
            let fake = FakeJenkins::new();
            fake.set_job("done", &[], vec![create_build("done", 1, Some("SUCCESS"), 30)]);
            fake.set_job("busy", &[], vec![create_build("busy", 1, None, 0)]);
            let cache = || DataCache::new(temp_dir.path().to_path_buf(), CachePolicy::default());
            let mut first = PipelineGraph::new(Box::new(fake.clone()), cache());
            for name in ["done", "busy"] {
                let job = first.job(&job_url(name));
                first.load_job(job).unwrap();
            }

            // Act
            let mut second = PipelineGraph::new(Box::new(fake.clone()), cache());
            for name in ["done", "busy"] {
                let job = second.job(&job_url(name));
                second.load_job(job).unwrap();
            }

            // Assert
            assert_eq!(fake.job_fetches(&job_url("done")), 1, "complete job comes from disk");
            assert_eq!(fake.job_fetches(&job_url("busy")), 2, "volatile job is never written");
        }

        #[test]
        fn test_disk_cache_is_skipped_after_invalidation() {
            let temp_dir = TempDir::new().unwrap();
            let fake = FakeJenkins::new();
            fake.set_job("done", &[], vec![create_build("done", 1, Some("SUCCESS"), 30)]);
            let cache = || DataCache::new(temp_dir.path().to_path_buf(), CachePolicy::default());
            let mut first = PipelineGraph::new(Box::new(fake.clone()), cache());
            let job = first.job(&job_url("done"));
            first.load_job(job).unwrap();

            let mut second = PipelineGraph::new(Box::new(fake.clone()), cache());
            second.invalidate();
            let job = second.job(&job_url("done"));
            second.load_job(job).unwrap();

            assert_eq!(fake.job_fetches(&job_url("done")), 2, "refreshed jobs come from Jenkins");
        }
    }

    mod runs_tests {
        use super::*;

        const CONFIG_A: &str = "architecture=x86_64,platform=el-7,project=chef,role=builder";
        const CONFIG_B: &str = "architecture=i386,platform=ubuntu-14.04,project=chef,role=builder";

        fn create_run(configuration: &str, number: u64, result: &str) -> BuildData {
            let mut run = create_build(&format!("matrix/{configuration}"), number, Some(result), 20);
            run.url = format!("{}{configuration}/{number}/", job_url("matrix"));
            run
        }

        #[test]
        fn test_runs_are_filtered_by_number() {
            // Arrange
            let fake = FakeJenkins::new();
            fake.set_job("matrix", &[], vec![create_build("matrix", 7, Some("FAILURE"), 60)]);
            fake.set_configurations("matrix", &[CONFIG_A, CONFIG_B]);
            fake.set_runs(
                &build_url("matrix", 7),
                vec![
                    create_run(CONFIG_A, 7, "FAILURE"),
                    create_run(CONFIG_B, 6, "SUCCESS"),
                ],
            );
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("matrix", 7)).unwrap();

            // Act
            let runs = graph.runs(build).unwrap();
            graph.runs(build).unwrap();

            // Assert
            assert_eq!(runs.len(), 1, "run 6 belongs to another build");
            assert_eq!(graph.result(runs[0]).unwrap(), BuildResult::Failure);
            assert_eq!(
                graph.job_url(graph.build_job(runs[0])),
                format!("{}{CONFIG_A}/", job_url("matrix"))
            );
            assert_eq!(fake.runs_fetches(&build_url("matrix", 7)), 1);
        }

        #[test]
        fn test_plain_jobs_have_no_runs() {
            let fake = FakeJenkins::new();
            fake.set_job("plain", &[], vec![create_build("plain", 1, Some("SUCCESS"), 1)]);
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("plain", 1)).unwrap();

            assert!(graph.runs(build).unwrap().is_empty());
            assert_eq!(fake.runs_fetches(&build_url("plain", 1)), 0);
        }
    }

    mod job_tests {
        use super::*;

        #[test]
        fn test_trigger_builds_of_a_job() {
            let fake = create_retry_pipeline();
            let mut graph = create_graph(&fake);
            let trigger_job = graph.job(&job_url("trigger"));
            let test_job = graph.job(&job_url("test"));

            assert_eq!(graph.trigger_builds(trigger_job).unwrap().len(), 1);
            assert!(graph.trigger_builds(test_job).unwrap().is_empty());
        }

        #[test]
        fn test_deleted_job_yields_placeholders() {
            let fake = FakeJenkins::new();
            let mut graph = create_graph(&fake);
            let build = graph.build(&build_url("gone", 3)).unwrap();

            assert!(graph.is_missing(build).unwrap());
            assert_eq!(graph.result(build).unwrap(), BuildResult::Other(DELETED.to_string()));
            assert!(graph.upstreams(build).unwrap().is_empty());
            assert!(graph.job_builds(graph.build_job(build)).unwrap().is_empty());
        }
    }
}
