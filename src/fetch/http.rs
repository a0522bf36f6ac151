//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the shared client (compression, cookie store for sessions)
//! - Rotating User-Agent and Accept-Language per request
//! - Classifying timeouts, connection errors and non-2xx statuses
//! - Polling rendered pages until their ready condition holds

use crate::config::UserAgentConfig;
use crate::fetch::robots::RobotsCache;
use crate::fetch::{FetchError, FetchKind, FetchRequest, Fetcher, ReadyCondition};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Interval between readiness checks of a rendered page
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Builds the HTTP client shared by the fetcher and the session
///
/// # Returns
///
/// * `Ok(Client)` - Client with gzip/brotli and a cookie store
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use paddock::fetch::build_http_client;
///
/// let client = build_http_client().unwrap();
/// ```
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by reqwest
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    agents: Vec<String>,
    languages: Vec<String>,
    robots: RobotsCache,
}

impl HttpFetcher {
    /// Creates a fetcher over an existing client
    ///
    /// Passing the client used for session establishment keeps its cookies.
    pub fn new(client: Client, config: &UserAgentConfig) -> Self {
        let agents = if config.agents.is_empty() {
            vec![format!("paddock/{}", env!("CARGO_PKG_VERSION"))]
        } else {
            config.agents.clone()
        };

        Self {
            robots: RobotsCache::new(client.clone()),
            client,
            agents,
            languages: config.accept_languages.clone(),
        }
    }

    fn pick<'a>(choices: &'a [String]) -> Option<&'a str> {
        match choices.len() {
            0 => None,
            1 => Some(&choices[0]),
            n => Some(&choices[fastrand::usize(..n)]),
        }
    }

    async fn get_once(&self, url: &Url, timeout: Duration, agent: &str) -> Result<String, FetchError> {
        let mut builder = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .header(USER_AGENT, agent)
            .header(ACCEPT, ACCEPT_HTML);
        if let Some(language) = Self::pick(&self.languages) {
            builder = builder.header(ACCEPT_LANGUAGE, language);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| classify_error(e, timeout))
    }

    async fn wait_until_ready(
        &self,
        url: &Url,
        timeout: Duration,
        agent: &str,
        condition: &ReadyCondition,
    ) -> Result<String, FetchError> {
        let deadline = Instant::now() + condition.timeout;
        loop {
            let body = self.get_once(url, timeout, agent).await?;
            if document_matches(&body, &condition.locator)? {
                return Ok(body);
            }
            if Instant::now() + READY_POLL_INTERVAL > deadline {
                return Err(FetchError::NotReady {
                    locator: condition.locator.clone(),
                    timeout: condition.timeout,
                });
            }
            tracing::trace!("{} not ready yet, polling again", url);
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let agent = Self::pick(&self.agents).unwrap_or("paddock");

        if request.obey_robots && !self.robots.is_allowed(&request.url, agent).await {
            return Err(FetchError::RobotsDenied);
        }

        match &request.kind {
            FetchKind::Rendered {
                wait_for: Some(condition),
            } => {
                self.wait_until_ready(&request.url, request.timeout, agent, condition)
                    .await
            }
            FetchKind::Static | FetchKind::Rendered { wait_for: None } => {
                self.get_once(&request.url, request.timeout, agent).await
            }
        }
    }
}

/// Maps a reqwest error onto a retry-relevant fetch error
fn classify_error(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout)
    } else if error.is_connect() {
        FetchError::Connection(error.to_string())
    } else if let Some(status) = error.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Request(error.to_string())
    }
}

/// Checks whether a CSS locator matches anything in the document
fn document_matches(body: &str, locator: &str) -> Result<bool, FetchError> {
    let selector = Selector::parse(locator)
        .map_err(|e| FetchError::Request(format!("invalid locator '{}': {:?}", locator, e)))?;
    let document = Html::parse_document(body);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}
