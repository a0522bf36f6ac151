//! Fetch dispatch: runs one task from fetch through extraction
//!
//! The dispatcher is shared by every in-flight task. Per task it:
//! - waits for the domain's pacing slot (the caller already holds the
//!   domain permit)
//! - fetches under a deadline, retrying transient failures with backoff
//! - feeds each fetch latency into the adaptive delay
//! - hands the document to the job's extractor
//!
//! Whatever happens, the result is a [`Completion`]; task-scoped failures
//! never escape as errors.

use crate::config::{Config, CrawlerConfig, ThrottleConfig};
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::crawler::throttle::{AdaptiveDelay, Pacer};
use crate::extract::{ExtractError, Extractor, SelectorExtractor};
use crate::fetch::{FetchError, FetchKind, FetchRequest, Fetcher};
use crate::state::{FetchTask, RecordBatch, TaskState};
use crate::url::domain_key;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Why a task ended without records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The document could not be retrieved (retries exhausted or permanent)
    Fetch(FetchError),

    /// The document was retrieved but the extractor rejected it
    Extraction(ExtractError),

    /// No route is registered for the task's job
    UnknownJob(String),

    /// The task's worker panicked
    Panicked(String),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "fetch failed: {}", e),
            Self::Extraction(e) => write!(f, "extraction failed: {}", e),
            Self::UnknownJob(job) => write!(f, "no extractor for job '{}'", job),
            Self::Panicked(reason) => write!(f, "task panicked: {}", reason),
        }
    }
}

/// Result of running a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        records: RecordBatch,
        next_link: Option<String>,
    },
    Failed(TaskFailure),
}

/// A finished task and what came of it
#[derive(Debug, Clone)]
pub struct Completion {
    /// The task, with its final retry count
    pub task: FetchTask,

    /// Terminal state reached
    pub state: TaskState,

    pub outcome: Outcome,
}

/// How tasks of one job are fetched and extracted
struct JobRoute {
    kind: FetchKind,
    extractor: Arc<dyn Extractor>,
}

/// Runs fetch tasks against a [`Fetcher`] and the registered extractors
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    routes: HashMap<String, JobRoute>,
    retry: RetryPolicy,
    pacer: Pacer,
    delay: AdaptiveDelay,
    timeout: Duration,
    obey_robots: bool,
}

impl Dispatcher {
    /// Creates a dispatcher with no registered jobs
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Document source shared by every task
    /// * `crawler` - Timeouts, retry and pacing settings
    /// * `throttle` - Adaptive delay settings
    pub fn new(fetcher: Arc<dyn Fetcher>, crawler: &CrawlerConfig, throttle: &ThrottleConfig) -> Self {
        Self {
            fetcher,
            routes: HashMap::new(),
            retry: RetryPolicy::from_config(crawler),
            pacer: Pacer::from_config(crawler),
            delay: AdaptiveDelay::from_config(crawler, throttle),
            timeout: crawler.fetch_timeout(),
            obey_robots: crawler.robots_obey,
        }
    }

    /// Creates a dispatcher with a selector extractor for every configured job
    pub fn from_config(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self, ExtractError> {
        let mut dispatcher = Self::new(fetcher, &config.crawler, &config.throttle);
        for job in &config.jobs {
            let extractor = SelectorExtractor::from_job(job)?;
            dispatcher.register(&job.name, FetchKind::for_job(job), Arc::new(extractor));
        }
        Ok(dispatcher)
    }

    /// Registers (or replaces) the route for a job
    pub fn register(&mut self, job: &str, kind: FetchKind, extractor: Arc<dyn Extractor>) {
        self.routes
            .insert(job.to_string(), JobRoute { kind, extractor });
    }

    /// Runs one task to a terminal state
    pub async fn run_task(&self, mut task: FetchTask) -> Completion {
        let mut state = TaskState::Pending;

        let Some(route) = self.routes.get(&task.job) else {
            let failure = TaskFailure::UnknownJob(task.job.clone());
            return Completion {
                task,
                state: TaskState::FetchFailed,
                outcome: Outcome::Failed(failure),
            };
        };

        let request = FetchRequest {
            url: task.url.clone(),
            kind: route.kind.clone(),
            timeout: self.timeout,
            obey_robots: self.obey_robots,
        };
        let domain = domain_key(&task.url);

        advance(&task, &mut state, TaskState::Fetching);
        let body = loop {
            self.pacer.wait_turn(&domain, self.delay.current()).await;

            let started = Instant::now();
            let result = match tokio::time::timeout(request.deadline(), self.fetcher.fetch(&request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(request.deadline())),
            };
            self.delay.observe(started.elapsed(), result.is_ok());

            let error = match result {
                Ok(body) => break body,
                Err(error) => error,
            };

            match self.retry.decide(task.retry_count, &error) {
                RetryDecision::RetryAfter(backoff) => {
                    task.retry_count += 1;
                    tracing::warn!(
                        "Task {} ({}): {}, retry {}/{} in {:?}",
                        task.id,
                        task.label(),
                        error,
                        task.retry_count,
                        self.retry.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    advance(&task, &mut state, TaskState::Fetching);
                }
                RetryDecision::NoRetry => {
                    advance(&task, &mut state, TaskState::FetchFailed);
                    return Completion {
                        task,
                        state,
                        outcome: Outcome::Failed(TaskFailure::Fetch(error)),
                    };
                }
            }
        };

        advance(&task, &mut state, TaskState::Succeeded);
        advance(&task, &mut state, TaskState::Extracting);

        let outcome = match route.extractor.extract(&body, &task) {
            Ok(extraction) => {
                advance(&task, &mut state, TaskState::Emitted);
                Outcome::Succeeded {
                    records: extraction.records,
                    next_link: extraction.next_link,
                }
            }
            Err(error) => {
                advance(&task, &mut state, TaskState::ExtractionFailed);
                Outcome::Failed(TaskFailure::Extraction(error))
            }
        };

        Completion {
            task,
            state,
            outcome,
        }
    }
}

fn advance(task: &FetchTask, state: &mut TaskState, next: TaskState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {} -> {}",
        state,
        next
    );
    tracing::trace!("Task {}: {} -> {}", task.id, state, next);
    *state = next;
}
