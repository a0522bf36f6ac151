/// Task state definitions for tracking a fetch task through dispatch
///
/// A task moves `Pending -> Fetching`, then either ends in `FetchFailed`
/// (after the retry budget is spent) or reaches `Succeeded -> Extracting` and
/// ends in `Emitted` or `ExtractionFailed`.
use std::fmt;

/// Represents the current state of a fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is queued in the frontier
    Pending,

    /// Task is being fetched (possibly on a retry attempt)
    Fetching,

    /// Content arrived and is waiting for extraction
    Succeeded,

    /// Content is being handed to the extractor
    Extracting,

    // ===== Terminal States =====
    /// Extraction produced zero or more records
    Emitted,

    /// Fetch failed after exhausting retries
    FetchFailed,

    /// The extractor could not make sense of the content
    ExtractionFailed,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Emitted | Self::FetchFailed | Self::ExtractionFailed
        )
    }

    /// Returns whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fetching)
                | (Self::Fetching, Self::Fetching)
                | (Self::Fetching, Self::Succeeded)
                | (Self::Fetching, Self::FetchFailed)
                | (Self::Succeeded, Self::Extracting)
                | (Self::Extracting, Self::Emitted)
                | (Self::Extracting, Self::ExtractionFailed)
        )
    }

    /// Short lowercase name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Succeeded => "succeeded",
            Self::Extracting => "extracting",
            Self::Emitted => "emitted",
            Self::FetchFailed => "fetch_failed",
            Self::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
