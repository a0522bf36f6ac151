//! Output module: where records and run reports go
//!
//! This module handles:
//! - Writing records to one CSV store per destination
//! - Tracking run progress and failures, and printing the run summary
//! - Exporting identifier lists from result files

mod export;
mod progress;
mod sink;

pub use export::{collect_columns, export_ids, write_ids, ColumnValues, ExportError};
pub use progress::{FailureEntry, ProgressTracker, RunProgress, RunSummary, MAX_ERROR_CHARS};
pub use sink::{CsvSink, OpenMode, RecordSink, SinkError, SinkOptions};
