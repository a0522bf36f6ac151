//! Run progress and failure bookkeeping
//!
//! The tracker is owned by the coordinator and updated once per finished
//! task. It never fails: it only counts, logs and remembers failures for the
//! end-of-run summary.

use crate::state::{FetchTask, TaskId};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Error text kept per failure is cut to this many characters
pub const MAX_ERROR_CHARS: usize = 200;

/// One failed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub task_id: TaskId,
    pub job: String,
    pub url: String,

    /// Identifier or URL, as shown in progress lines
    pub label: String,

    /// Error text, truncated to [`MAX_ERROR_CHARS`]
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunProgress {
    /// Tasks known so far (grows as next-page tasks are discovered)
    pub total: u64,

    /// Tasks that reached a successful terminal state
    pub completed: u64,

    /// Tasks that reached a failed terminal state
    pub failed: u64,
}

impl RunProgress {
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.finished() as f64 / self.total as f64 * 100.0
    }
}

/// Counts finished tasks and reports progress periodically
#[derive(Debug)]
pub struct ProgressTracker {
    every: u64,
    progress: RunProgress,
    failures: Vec<FailureEntry>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ProgressTracker {
    /// Creates a tracker logging a progress line every `every` finished tasks
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            progress: RunProgress::default(),
            failures: Vec::new(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Adds newly enqueued tasks to the total
    pub fn add_tasks(&mut self, n: usize) {
        self.progress.total += n as u64;
    }

    pub fn record_success(&mut self, task: &FetchTask) {
        self.progress.completed += 1;
        self.report(task, true);
    }

    pub fn record_failure(&mut self, task: &FetchTask, reason: &str) {
        self.progress.failed += 1;
        let error = truncate(reason, MAX_ERROR_CHARS);
        tracing::warn!("Task {} ({}) failed: {}", task.id, task.label(), error);

        self.failures.push(FailureEntry {
            task_id: task.id,
            job: task.job.clone(),
            url: task.url.to_string(),
            label: task.label().to_string(),
            error,
            at: Utc::now(),
        });
        self.report(task, false);
    }

    fn report(&self, task: &FetchTask, ok: bool) {
        let finished = self.progress.finished();
        if finished % self.every == 0 || finished == self.progress.total {
            tracing::info!(
                "{}/{} ({:.1}%) last={} ok={}",
                finished,
                self.progress.total,
                self.progress.percent(),
                task.label(),
                ok
            );
        }
    }

    pub fn progress(&self) -> RunProgress {
        self.progress
    }

    pub fn failures(&self) -> &[FailureEntry] {
        &self.failures
    }

    /// Ends tracking and builds the run summary
    pub fn finish(self, destinations: Vec<(String, u64)>, cancelled: bool) -> RunSummary {
        RunSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.started.elapsed(),
            progress: self.progress,
            failures: self.failures,
            destinations,
            cancelled,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub progress: RunProgress,
    pub failures: Vec<FailureEntry>,

    /// Records written per destination
    pub destinations: Vec<(String, u64)>,

    /// Whether the run stopped early on request
    pub cancelled: bool,
}

impl RunSummary {
    pub fn completed(&self) -> u64 {
        self.progress.completed
    }

    pub fn failed(&self) -> u64 {
        self.progress.failed
    }

    pub fn records_written(&self) -> u64 {
        self.destinations.iter().map(|(_, n)| n).sum()
    }

    /// Returns the success rate as a percentage of finished tasks
    pub fn success_rate(&self) -> f64 {
        let finished = self.progress.finished();
        if finished == 0 {
            return 0.0;
        }
        self.progress.completed as f64 / finished as f64 * 100.0
    }

    /// Prints the summary to stdout
    pub fn print(&self) {
        println!("=== Crawl Summary ===\n");

        println!("Run:");
        println!("  Started:  {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  Finished: {}", self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  Elapsed:  {:.1}s", self.elapsed.as_secs_f64());
        if self.cancelled {
            println!("  Stopped early (cancelled)");
        }
        println!();

        println!("Tasks:");
        println!("  Total:     {}", self.progress.total);
        println!("  Completed: {}", self.progress.completed);
        println!("  Failed:    {}", self.progress.failed);
        println!("  Success rate: {:.1}%", self.success_rate());
        println!();

        if !self.destinations.is_empty() {
            println!("Records written ({}):", self.records_written());
            for (destination, count) in &self.destinations {
                println!("  {}: {}", destination, count);
            }
            println!();
        }

        if !self.failures.is_empty() {
            println!("Failures ({}):", self.failures.len());
            for failure in &self.failures {
                println!(
                    "  [{}] {} {}: {}",
                    failure.at.format("%H:%M:%S"),
                    failure.job,
                    failure.label,
                    failure.error
                );
            }
        }
    }
}
