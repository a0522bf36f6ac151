//! Document retrieval
//!
//! The dispatcher only sees the [`Fetcher`] trait: give it a URL and a fetch
//! kind, get back the document text or a classified [`FetchError`]. The
//! production implementation is [`HttpFetcher`]; tests substitute their own.

mod http;
mod robots;

pub use http::{build_http_client, HttpFetcher};
pub use robots::{RobotsCache, RobotsRules};

use crate::config::JobConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a fetch produced no document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("'{locator}' did not appear within {timeout:?}")]
    NotReady { locator: String, timeout: Duration },

    #[error("disallowed by robots.txt")]
    RobotsDenied,

    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Condition a rendered document must satisfy before it is handed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCondition {
    /// CSS selector that must match at least one element
    pub locator: String,

    /// How long to wait for the locator
    pub timeout: Duration,
}

/// How a document is retrieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// Plain request, the response body is the document
    Static,

    /// The document is only complete once its ready condition holds
    Rendered { wait_for: Option<ReadyCondition> },
}

impl FetchKind {
    /// Derives the fetch kind from a job's configuration
    pub fn for_job(job: &JobConfig) -> Self {
        if !job.render {
            return Self::Static;
        }
        Self::Rendered {
            wait_for: job.wait_for.as_ref().map(|locator| ReadyCondition {
                locator: locator.clone(),
                timeout: Duration::from_secs(job.wait_timeout),
            }),
        }
    }

    /// Extra time the fetch may spend waiting for readiness
    pub fn ready_timeout(&self) -> Duration {
        match self {
            Self::Rendered {
                wait_for: Some(condition),
            } => condition.timeout,
            _ => Duration::ZERO,
        }
    }
}

/// One fetch to perform
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub kind: FetchKind,

    /// Per-request timeout
    pub timeout: Duration,

    /// Whether robots.txt must be consulted first
    pub obey_robots: bool,
}

impl FetchRequest {
    /// Upper bound on the whole fetch, readiness wait included
    pub fn deadline(&self) -> Duration {
        self.timeout + self.kind.ready_timeout()
    }
}

/// Retrieves documents
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches one document
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The document text
    /// * `Err(FetchError)` - Classified failure; the dispatcher decides on retries
    async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError>;
}
