//! Record extraction
//!
//! An [`Extractor`] turns one fetched document into records and, optionally,
//! the link to the next page. Extraction is pure: it sees the document text
//! and the task, nothing else.

mod selector;

pub use selector::SelectorExtractor;

use crate::state::{FetchTask, RecordBatch};
use thiserror::Error;

/// What one document yielded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Records in document order
    pub records: RecordBatch,

    /// Raw href of the "next page" link, resolved later against the task URL
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("{0}")]
    Content(String),
}

/// Turns a fetched document into records
pub trait Extractor: Send + Sync {
    fn extract(&self, content: &str, task: &FetchTask) -> Result<Extraction, ExtractError>;
}
