//! State module for tracking crawl work
//!
//! This module provides the data model shared by the frontier, the dispatcher
//! and the sink.
//!
//! # Components
//!
//! - `FetchTask`: a pending unit of work (URL, job, context, retry count)
//! - `TaskState`: where a task is in its fetch/extract life cycle
//! - `Record` / `Fields`: extracted rows and their ordered field maps

mod record;
mod task;
mod task_state;

// Re-export main types
pub use record::{is_metadata_key, Fields, Record, RecordBatch, METADATA_PREFIX};
pub use task::{FetchTask, TaskId, TaskKind};
pub use task_state::TaskState;
