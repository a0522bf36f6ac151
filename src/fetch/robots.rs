//! robots.txt rules and their per-host cache

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

/// robots.txt content for one host
#[derive(Debug, Clone)]
pub struct RobotsRules {
    /// Raw robots.txt body (empty means allow all)
    content: String,

    /// When the rules were fetched
    pub fetched_at: DateTime<Utc>,
}

impl RobotsRules {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            fetched_at: Utc::now(),
        }
    }

    /// Rules that allow everything (used when robots.txt is missing or unreadable)
    pub fn allow_all() -> Self {
        Self::from_content("")
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// # Arguments
    ///
    /// * `url` - The full URL to check
    /// * `user_agent` - The user agent string sent with the request
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Rules older than a day are refetched
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Rules for one origin; the lock is held while they are fetched
type Entry = Arc<AsyncMutex<Option<RobotsRules>>>;

/// Fetches robots.txt at most once per host per day
///
/// Each origin has its own entry lock, so a slow robots.txt only delays
/// checks against that origin.
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RobotsCache {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Checks a URL against its host's robots.txt, fetching it if needed
    ///
    /// Unreachable or non-2xx robots.txt files allow everything.
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let origin = url.origin().ascii_serialization();

        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(origin.clone()).or_default().clone()
        };

        let mut cached = entry.lock().await;
        let rules = match cached.as_ref().filter(|rules| !rules.is_stale()) {
            Some(rules) => rules.clone(),
            None => {
                let rules = self.fetch_rules(&origin, user_agent).await;
                *cached = Some(rules.clone());
                rules
            }
        };
        drop(cached);

        rules.is_allowed(url.as_str(), user_agent)
    }

    async fn fetch_rules(&self, origin: &str, user_agent: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);
        tracing::debug!("Fetching {}", robots_url);

        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::from_content(&body),
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", robots_url, e);
                    RobotsRules::allow_all()
                }
            },
            Ok(response) => {
                tracing::debug!("{} returned {}, allowing all", robots_url, response.status());
                RobotsRules::allow_all()
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }
}
