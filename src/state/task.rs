use crate::state::record::Fields;
use std::fmt;
use url::Url;

/// Run-unique identifier of a fetch task, assigned by the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Built from an identifier list or a configured start URL
    Enumerated,

    /// Built from a "next page" link found during extraction
    Discovered,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enumerated => "enumerated",
            Self::Discovered => "discovered",
        }
    }
}

/// A unit of work in the frontier
///
/// Created by the frontier, consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub id: TaskId,

    /// Name of the job that owns this task (routes to fetch kind and extractor)
    pub job: String,

    /// The document to fetch
    pub url: Url,

    pub kind: TaskKind,

    /// Context handed to the extractor (always has "job"; enumerated tasks have "id")
    pub context: Fields,

    /// Number of retries already spent on this task
    pub retry_count: u32,

    /// Position in a pagination chain, 0 for enumerated tasks
    pub page: u32,
}

impl FetchTask {
    /// Identifier this task was built from, if any
    pub fn identifier(&self) -> Option<&str> {
        self.context.get("id")
    }

    /// Short label used in log lines: the identifier when present, otherwise the URL
    pub fn label(&self) -> &str {
        self.identifier().unwrap_or(self.url.as_str())
    }
}
