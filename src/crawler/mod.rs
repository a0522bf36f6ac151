//! Crawler module: from identifier lists to records
//!
//! This module contains the core crawling logic, including:
//! - The frontier of pending fetch tasks and identifier ingestion
//! - Task dispatch with retries, per-domain bounds and adaptive delay
//! - The run loop that ties fetching, extraction and the sink together

mod coordinator;
mod dispatcher;
mod frontier;
mod retry;
mod throttle;

pub use coordinator::{plan_jobs, run_crawl, select_jobs, Coordinator, JobPlan};
pub use dispatcher::{Completion, Dispatcher, Outcome, TaskFailure};
pub use frontier::{parse_identifiers, read_identifier_file, Frontier, IdShape, IngestError};
pub use retry::{RetryDecision, RetryPolicy};
pub use throttle::{AdaptiveDelay, DomainLimiter, Pacer};
