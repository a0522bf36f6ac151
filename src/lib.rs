//! Paddock: an identifier-driven crawl orchestrator
//!
//! This crate turns lists of entity identifiers (and "next page" links found
//! while crawling) into fetch tasks, retrieves the documents politely, extracts
//! records from them and appends those records to one CSV store per record type.
//! A failing page never stops the batch; a broken sink contract always does.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod session;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for paddock operations
///
/// Every variant is run-scoped: task-scoped failures (fetch, extraction) are
/// reported through the progress tracker and never surface here.
#[derive(Debug, Error)]
pub enum PaddockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Ingest(#[from] crawler::IngestError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for paddock operations
pub type Result<T> = std::result::Result<T, PaddockError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_crawl, Coordinator};
pub use output::{CsvSink, OpenMode, RecordSink, RunSummary};
pub use state::{FetchTask, Fields, Record, TaskKind, TaskState};
