//! Crawler coordinator - the run loop
//!
//! The coordinator owns the frontier and the progress tracker. It issues the
//! oldest queued task whose domain has a free permit, collects completions
//! as in-flight tasks finish, hands records to the sink in completion order
//! and chains discovered "next page" tasks back into the frontier.
//!
//! Task-scoped failures are counted and the run goes on. A sink failure is
//! run-scoped: nothing more is written, in-flight tasks are drained and
//! discarded, and the run ends with an error.

use crate::config::{Config, CrawlerConfig, JobConfig};
use crate::crawler::dispatcher::{Completion, Dispatcher, Outcome, TaskFailure};
use crate::crawler::frontier::Frontier;
use crate::crawler::throttle::DomainLimiter;
use crate::fetch::{build_http_client, HttpFetcher};
use crate::output::{CsvSink, ProgressTracker, RecordSink, RunSummary, SinkError};
use crate::session::{establish_best_effort, FormLogin, SessionEstablisher};
use crate::state::TaskState;
use crate::{ConfigError, PaddockError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Main crawler coordinator structure
pub struct Coordinator {
    dispatcher: Arc<Dispatcher>,
    limiter: DomainLimiter,
    sink: Arc<dyn RecordSink>,
    session: Option<Box<dyn SessionEstablisher>>,
    frontier: Frontier,
    tracker: ProgressTracker,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator with an empty frontier
    ///
    /// # Arguments
    ///
    /// * `dispatcher` - Runs each task through fetch and extraction
    /// * `sink` - Receives every extracted record
    /// * `crawler` - Per-domain concurrency and progress settings
    pub fn new(dispatcher: Dispatcher, sink: Arc<dyn RecordSink>, crawler: &CrawlerConfig) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            limiter: DomainLimiter::new(crawler.concurrent_per_domain as usize),
            sink,
            session: None,
            frontier: Frontier::new(),
            tracker: ProgressTracker::new(crawler.progress_every),
            cancel: CancellationToken::new(),
        }
    }

    /// Establishes this session before the first task is issued
    pub fn with_session(mut self, session: Box<dyn SessionEstablisher>) -> Self {
        self.session = Some(session);
        self
    }

    /// Stops issuing new tasks once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that cancels this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingests a job's input into the frontier
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of tasks enqueued
    /// * `Err(PaddockError::Ingest)` - The input is malformed; nothing from it was enqueued
    pub fn ingest_job(&mut self, job: &JobConfig) -> Result<usize> {
        let tasks = self.frontier.ingest_job(job)?;
        self.tracker.add_tasks(tasks.len());
        tracing::info!("Job {}: {} tasks queued", job.name, tasks.len());
        Ok(tasks.len())
    }

    /// Number of tasks waiting to be issued
    pub fn pending(&self) -> usize {
        self.frontier.len()
    }

    /// Runs until the frontier is drained or the run is cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Every issued task reached a terminal state
    /// * `Err(PaddockError::Sink)` - The sink rejected a record; the run stopped
    pub async fn run(mut self) -> Result<RunSummary> {
        if let Some(session) = &self.session {
            establish_best_effort(session.as_ref()).await;
        }

        tracing::info!("Starting crawl: {} tasks queued", self.pending());

        let cancel = self.cancel.clone();
        let mut in_flight = JoinSet::new();
        let mut stopping = false;
        let mut cancelled = false;
        let mut fatal: Option<SinkError> = None;

        loop {
            if !stopping && cancel.is_cancelled() {
                let dropped = self.frontier.clear();
                tracing::info!(
                    "Cancellation requested: dropping {} queued tasks, waiting for in-flight ones",
                    dropped
                );
                stopping = true;
                cancelled = true;
            }
            if !stopping {
                self.issue_ready(&mut in_flight);
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                // Handled at the top of the loop
                _ = cancel.cancelled(), if !stopping => {}
                joined = in_flight.join_next() => {
                    let completion = match joined {
                        Some(Ok(completion)) => completion,
                        Some(Err(e)) => {
                            tracing::error!("Task worker failed: {}", e);
                            continue;
                        }
                        None => continue,
                    };

                    if fatal.is_some() {
                        tracing::debug!("Discarding task {} after sink failure", completion.task.id);
                        continue;
                    }

                    if let Err(e) = self.complete(completion, stopping) {
                        tracing::error!("Sink failure, stopping the run: {}", e);
                        self.frontier.clear();
                        stopping = true;
                        fatal = Some(e);
                    }
                }
            }
        }

        self.sink.close();
        let summary = self.tracker.finish(self.sink.destinations(), cancelled);
        tracing::info!(
            "Crawl finished: {} completed, {} failed in {:.1}s",
            summary.completed(),
            summary.failed(),
            summary.elapsed.as_secs_f64()
        );

        match fatal {
            Some(e) => Err(PaddockError::Sink(e)),
            None => Ok(summary),
        }
    }

    /// Issues queued tasks while any of their domains has a free permit
    fn issue_ready(&mut self, in_flight: &mut JoinSet<Completion>) {
        let limiter = &self.limiter;
        while let Some((task, permit)) = self
            .frontier
            .pop_admitted(|domain| limiter.try_acquire(domain))
        {
            tracing::debug!("Issuing task {} ({})", task.id, task.url);
            let dispatcher = Arc::clone(&self.dispatcher);
            in_flight.spawn(async move {
                let issued = task.clone();
                let worker = tokio::spawn(async move { dispatcher.run_task(task).await });
                let completion = match worker.await {
                    Ok(completion) => completion,
                    Err(e) => Completion {
                        task: issued,
                        state: TaskState::FetchFailed,
                        outcome: Outcome::Failed(TaskFailure::Panicked(e.to_string())),
                    },
                };
                drop(permit);
                completion
            });
        }
    }

    /// Applies one completion: records to the sink, next link to the frontier
    fn complete(&mut self, completion: Completion, stopping: bool) -> std::result::Result<(), SinkError> {
        let Completion { task, state, outcome } = completion;

        match outcome {
            Outcome::Succeeded { records, next_link } => {
                let count = records.len();
                if let Err(e) = self.sink.accept_batch(records) {
                    self.tracker.record_failure(&task, &e.to_string());
                    return Err(e);
                }
                tracing::debug!("Task {} {}: {} records", task.id, state, count);

                if let Some(link) = next_link.filter(|_| !stopping) {
                    if self.frontier.ingest_discovered(&task, &link).is_some() {
                        self.tracker.add_tasks(1);
                    }
                }
                self.tracker.record_success(&task);
            }
            Outcome::Failed(failure) => {
                self.tracker.record_failure(&task, &failure.to_string());
            }
        }
        Ok(())
    }
}

/// Jobs a run will execute: all of them, or the named ones in config order
///
/// # Errors
///
/// `PaddockError::UnknownJob` when a requested name is not configured.
pub fn select_jobs<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a JobConfig>> {
    if let Some(unknown) = names
        .iter()
        .find(|name| !config.jobs.iter().any(|job| &job.name == *name))
    {
        return Err(PaddockError::UnknownJob(unknown.clone()));
    }

    Ok(config
        .jobs
        .iter()
        .filter(|job| names.is_empty() || names.contains(&job.name))
        .collect())
}

/// What a job would enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub name: String,
    pub tasks: usize,
}

/// Ingests the selected jobs into a scratch frontier without fetching
///
/// Input errors surface exactly as they would at the start of a run.
pub fn plan_jobs(config: &Config, names: &[String]) -> Result<Vec<JobPlan>> {
    let mut frontier = Frontier::new();
    select_jobs(config, names)?
        .into_iter()
        .map(|job| {
            let tasks = frontier.ingest_job(job)?;
            Ok(JobPlan {
                name: job.name.clone(),
                tasks: tasks.len(),
            })
        })
        .collect()
}

/// Runs a crawl with the HTTP fetcher, selector extractors and CSV sink
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `jobs` - Job names to run; all configured jobs when empty
/// * `cancel` - Cancels the run gracefully when fired
///
/// # Returns
///
/// * `Ok(RunSummary)` - The run finished or was cancelled
/// * `Err(PaddockError)` - Input, client or sink failure
///
/// # Example
///
/// ```no_run
/// use paddock::config::load_config;
/// use paddock::crawler::run_crawl;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("paddock.toml"))?;
/// let summary = run_crawl(config, &[], CancellationToken::new()).await?;
/// summary.print();
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, jobs: &[String], cancel: CancellationToken) -> Result<RunSummary> {
    let selected = select_jobs(&config, jobs)?;

    let client = build_http_client()?;
    let fetcher = Arc::new(HttpFetcher::new(client.clone(), &config.user_agent));
    let dispatcher = Dispatcher::from_config(&config, fetcher)
        .map_err(|e| ConfigError::InvalidSelector(e.to_string()))?;
    let sink = Arc::new(CsvSink::from_config(&config.output));

    let mut coordinator = Coordinator::new(dispatcher, sink, &config.crawler).with_cancellation(cancel);
    if let Some(session) = &config.session {
        coordinator = coordinator.with_session(Box::new(FormLogin::new(client, session.clone())));
    }

    for job in selected {
        coordinator.ingest_job(job)?;
    }

    coordinator.run().await
}
