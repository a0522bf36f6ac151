use crate::output::OpenMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for paddock
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

/// Fetch dispatch behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Per-request timeout (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Retries after the first attempt for retryable failures
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// HTTP statuses treated as transient
    #[serde(default = "default_retry_http_codes")]
    pub retry_http_codes: Vec<u16>,

    /// Base backoff before the first retry (milliseconds)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u64,

    /// Upper bound on backoff (milliseconds)
    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max: u64,

    /// Maximum in-flight fetches per domain
    #[serde(default = "default_concurrent_per_domain")]
    pub concurrent_per_domain: u32,

    /// Base delay between requests to the same domain (milliseconds)
    #[serde(default = "default_download_delay")]
    pub download_delay: u64,

    /// Whether to randomize each delay within the jitter window
    #[serde(default = "default_true")]
    pub randomize_delay: bool,

    /// Jitter window as a fraction of the delay (0.5 => 0.5x..1.5x)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Passed to the fetcher; when set robots.txt is consulted
    #[serde(default)]
    pub robots_obey: bool,

    /// Emit a progress line every N finished tasks
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl CrawlerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn download_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: default_fetch_timeout(),
            retry_times: default_retry_times(),
            retry_http_codes: default_retry_http_codes(),
            retry_backoff: default_retry_backoff(),
            retry_backoff_max: default_retry_backoff_max(),
            concurrent_per_domain: default_concurrent_per_domain(),
            download_delay: default_download_delay(),
            randomize_delay: true,
            jitter: default_jitter(),
            robots_obey: false,
            progress_every: default_progress_every(),
        }
    }
}

/// Latency-driven delay adjustment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottleConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Latency above which the delay grows (milliseconds)
    #[serde(default = "default_target_latency")]
    pub target_latency: u64,

    /// Lower clamp for the adaptive delay (milliseconds)
    #[serde(default = "default_min_delay")]
    pub min_delay: u64,

    /// Upper clamp for the adaptive delay (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_latency: default_target_latency(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

/// Request identification, rotated per request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    #[serde(default = "default_agents")]
    pub agents: Vec<String>,

    #[serde(default)]
    pub accept_languages: Vec<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            accept_languages: Vec::new(),
        }
    }
}

/// Output store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory relative destinations are resolved against
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Default open mode: true truncates, false appends
    #[serde(default)]
    pub overwrite: bool,

    /// Per-destination open mode overrides
    #[serde(default)]
    pub destinations: HashMap<String, OpenMode>,
}

impl OutputConfig {
    pub fn default_mode(&self) -> OpenMode {
        if self.overwrite {
            OpenMode::Overwrite
        } else {
            OpenMode::Append
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            overwrite: false,
            destinations: HashMap::new(),
        }
    }
}

/// Optional form login performed once before the crawl
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    pub login_url: String,

    /// Where the form is posted; defaults to `login-url`
    #[serde(default)]
    pub submit_url: Option<String>,

    #[serde(default = "default_username_field")]
    pub username_field: String,

    #[serde(default = "default_password_field")]
    pub password_field: String,

    /// Environment variable holding the username
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Text that only appears on pages served to an authenticated session
    #[serde(default)]
    pub logged_in_marker: Option<String>,
}

/// One crawl job: an input, a fetch kind, and extraction rules
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    pub name: String,

    /// URL built per identifier, with `{id}` as placeholder
    #[serde(default)]
    pub url_template: Option<String>,

    /// CSV whose first column lists identifiers
    #[serde(default)]
    pub ids_file: Option<PathBuf>,

    /// Identifiers must be exactly this many ASCII digits
    #[serde(default = "default_id_digits")]
    pub id_digits: usize,

    /// Literal entry points, used instead of an identifier list
    #[serde(default)]
    pub start_urls: Vec<String>,

    /// Request a rendered (script-executing) fetch
    #[serde(default)]
    pub render: bool,

    /// CSS locator that must match before a rendered page counts as ready
    #[serde(default)]
    pub wait_for: Option<String>,

    /// How long to wait for `wait-for` (seconds)
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,

    /// CSS selector of the "next page" link
    #[serde(default)]
    pub next: Option<String>,

    /// Safety cap on discovered pages for this job
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default, rename = "record")]
    pub records: Vec<RecordRule>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url_template: None,
            ids_file: None,
            id_digits: default_id_digits(),
            start_urls: Vec::new(),
            render: false,
            wait_for: None,
            wait_timeout: default_wait_timeout(),
            next: None,
            max_pages: default_max_pages(),
            records: Vec::new(),
        }
    }
}

/// How to build records for one destination from a page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordRule {
    pub destination: String,

    /// One record per matching element; one per page when absent
    #[serde(default)]
    pub rows: Option<String>,

    pub fields: Vec<FieldRule>,
}

/// Where one field's value comes from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldRule {
    pub name: String,

    /// CSS selector relative to the row (or document)
    #[serde(default)]
    pub select: Option<String>,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attr: Option<String>,

    /// Copy a value from the task context instead of the page
    #[serde(default)]
    pub context: Option<String>,

    /// Keep only the first run of ASCII digits
    #[serde(default)]
    pub digits: bool,

    /// Remove thousands separators
    #[serde(default)]
    pub strip_commas: bool,
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_retry_times() -> u32 {
    3
}

fn default_retry_http_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504, 522, 524, 408]
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_retry_backoff_max() -> u64 {
    30_000
}

fn default_concurrent_per_domain() -> u32 {
    1
}

fn default_download_delay() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_jitter() -> f64 {
    0.5
}

fn default_progress_every() -> u64 {
    10
}

fn default_target_latency() -> u64 {
    1_000
}

fn default_min_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_agents() -> Vec<String> {
    vec![format!("paddock/{}", env!("CARGO_PKG_VERSION"))]
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_username_field() -> String {
    "login_id".to_string()
}

fn default_password_field() -> String {
    "pswd".to_string()
}

fn default_username_env() -> String {
    "PADDOCK_USERNAME".to_string()
}

fn default_password_env() -> String {
    "PADDOCK_PASSWORD".to_string()
}

fn default_id_digits() -> usize {
    10
}

fn default_wait_timeout() -> u64 {
    6
}

fn default_max_pages() -> u32 {
    1_000
}
