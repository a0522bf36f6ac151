//! Frontier management: the queue of pending fetch tasks
//!
//! This module handles:
//! - Reading and validating identifier lists (header auto-skip, dedup)
//! - Turning identifiers and start URLs into enumerated tasks
//! - Chaining one discovered task per "next page" link, under a per-job cap
//! - FIFO ordering of everything pending

use crate::config::JobConfig;
use crate::state::{FetchTask, Fields, TaskId, TaskKind};
use crate::url::{domain_key, expand_template, resolve_link};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors raised while ingesting a job's input
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("row {row}: '{value}' is not a {digits}-digit identifier")]
    MalformedRow {
        row: usize,
        value: String,
        digits: usize,
    },

    #[error("failed to read identifier file {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    #[error("job '{job}': cannot build a URL from '{input}': {source}")]
    BadUrl {
        job: String,
        input: String,
        source: url::ParseError,
    },
}

/// Fixed-length numeric identifier shape (e.g. 10 ASCII digits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdShape {
    pub digits: usize,
}

impl IdShape {
    pub fn digits(digits: usize) -> Self {
        Self { digits }
    }

    pub fn matches(&self, value: &str) -> bool {
        value.len() == self.digits && value.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Validates and de-duplicates raw identifier rows
///
/// Rows are numbered from 1. Blank rows are skipped but keep their number. A
/// first row that does not match the shape is treated as a header and skipped;
/// any later mismatch aborts the whole ingestion.
///
/// # Example
///
/// ```
/// use paddock::crawler::{parse_identifiers, IdShape};
///
/// let rows = ["horse_id", "1234567890", "1234567890", "9999999999"];
/// let ids = parse_identifiers(rows, IdShape::digits(10)).unwrap();
/// assert_eq!(ids, vec!["1234567890", "9999999999"]);
/// ```
pub fn parse_identifiers<I, S>(rows: I, shape: IdShape) -> Result<Vec<String>, IngestError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    validate_rows(
        rows.into_iter()
            .enumerate()
            .map(|(i, raw)| (i + 1, raw.as_ref().to_string())),
        shape,
    )
}

fn validate_rows<I>(rows: I, shape: IdShape) -> Result<Vec<String>, IngestError>
where
    I: IntoIterator<Item = (usize, String)>,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for (row, raw) in rows {
        let value = raw.trim().trim_start_matches('\u{feff}').trim();
        if value.is_empty() {
            continue;
        }

        if !shape.matches(value) {
            if row == 1 {
                tracing::debug!("Skipping header row: {:?}", value);
                continue;
            }
            return Err(IngestError::MalformedRow {
                row,
                value: value.to_string(),
                digits: shape.digits,
            });
        }

        if seen.insert(value.to_string()) {
            ids.push(value.to_string());
        }
    }

    Ok(ids)
}

/// Reads identifiers from the first column of a CSV file
///
/// # Returns
///
/// * `Ok(Some(ids))` - Validated, de-duplicated identifiers in file order
/// * `Ok(None)` - The file is missing or has no rows (reported, not fatal)
/// * `Err(IngestError)` - The file is unreadable or has a malformed row
pub fn read_identifier_file(path: &Path, shape: IdShape) -> Result<Option<Vec<String>>, IngestError> {
    if !path.exists() {
        tracing::warn!("Identifier list not found: {}", path.display());
        return Ok(None);
    }

    let read_err = |source: csv::Error| IngestError::Read {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(|e| read_err(e.into()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());

    let mut lines = LineCounter::new(&bytes);
    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(read_err)?;
        let row = record
            .position()
            .map(|p| lines.line_at(p.byte()))
            .unwrap_or(index + 1);
        rows.push((row, record.get(0).unwrap_or("").to_string()));
    }

    if rows.iter().all(|(_, value)| value.trim().is_empty()) {
        tracing::warn!("Identifier list is empty: {}", path.display());
        return Ok(None);
    }

    validate_rows(rows, shape).map(Some)
}

/// Maps record byte offsets to the line numbers a user sees in an editor
///
/// Offsets must be fed in increasing order. Blank lines count.
struct LineCounter<'a> {
    bytes: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, byte: u64) -> usize {
        let mut start = usize::try_from(byte)
            .unwrap_or(usize::MAX)
            .clamp(self.offset, self.bytes.len());
        // The reader may report a record from the end of the previous one,
        // before the line breaks it skipped
        while start < self.bytes.len() && matches!(self.bytes[start], b'\r' | b'\n') {
            start += 1;
        }
        self.line += self.bytes[self.offset..start]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        self.offset = start;
        self.line
    }
}

/// The frontier: pending fetch tasks in FIFO order
///
/// The frontier is the only owner of the queue. It assigns task ids, refuses
/// duplicate (job, URL) pairs and enforces each job's pagination cap.
///
/// Pending tasks are kept in one queue per domain. Task ids grow with
/// enqueue order, so the oldest task overall is the domain head with the
/// smallest id.
#[derive(Debug, Default)]
pub struct Frontier {
    /// Pending tasks per domain key, oldest first; empty queues are removed
    queues: HashMap<String, VecDeque<FetchTask>>,

    /// Pending tasks across all domains
    pending: usize,

    /// Next task id to hand out
    next_id: u64,

    /// (job, URL) pairs that already have a task in this run
    seen: HashSet<(String, String)>,

    /// Discovered tasks created so far, per job
    discovered: HashMap<String, u32>,

    /// Maximum discovered tasks, per job
    page_caps: HashMap<String, u32>,
}

impl Frontier {
    /// Creates an empty frontier
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests a job's configured input
    ///
    /// Reads the identifier file (or the start URLs), registers the job's page
    /// cap and enqueues the resulting tasks. A missing or empty identifier file
    /// yields zero tasks.
    pub fn ingest_job(&mut self, job: &JobConfig) -> Result<Vec<FetchTask>, IngestError> {
        self.page_caps.insert(job.name.clone(), job.max_pages);

        match (&job.ids_file, &job.url_template) {
            (Some(path), Some(template)) => {
                let shape = IdShape::digits(job.id_digits);
                match read_identifier_file(path, shape)? {
                    Some(ids) => {
                        tracing::info!(
                            "Job {}: loaded {} identifiers from {}",
                            job.name,
                            ids.len(),
                            path.display()
                        );
                        self.ingest_enumerated(&job.name, template, &ids)
                    }
                    None => Ok(Vec::new()),
                }
            }
            _ => self.ingest_seeds(&job.name, &job.start_urls),
        }
    }

    /// Enqueues one enumerated task per identifier, in order
    ///
    /// All URLs are built before anything is enqueued, so a bad template
    /// leaves the frontier untouched.
    pub fn ingest_enumerated(
        &mut self,
        job: &str,
        template: &str,
        ids: &[String],
    ) -> Result<Vec<FetchTask>, IngestError> {
        let mut prepared = Vec::with_capacity(ids.len());
        for id in ids {
            let url = expand_template(template, id).map_err(|source| IngestError::BadUrl {
                job: job.to_string(),
                input: id.clone(),
                source,
            })?;
            let mut context = Fields::new();
            context.insert("job", job);
            context.insert("id", id.as_str());
            prepared.push((url, context));
        }

        Ok(self.enqueue_all(job, prepared))
    }

    /// Enqueues one enumerated task per literal start URL, in order
    pub fn ingest_seeds(&mut self, job: &str, urls: &[String]) -> Result<Vec<FetchTask>, IngestError> {
        let mut prepared = Vec::with_capacity(urls.len());
        for raw in urls {
            let url = Url::parse(raw).map_err(|source| IngestError::BadUrl {
                job: job.to_string(),
                input: raw.clone(),
                source,
            })?;
            let mut context = Fields::new();
            context.insert("job", job);
            prepared.push((url, context));
        }

        Ok(self.enqueue_all(job, prepared))
    }

    fn enqueue_all(&mut self, job: &str, prepared: Vec<(Url, Fields)>) -> Vec<FetchTask> {
        let mut tasks = Vec::with_capacity(prepared.len());
        for (url, context) in prepared {
            if !self.seen.insert((job.to_string(), url.as_str().to_string())) {
                tracing::debug!("Job {}: skipping duplicate URL {}", job, url);
                continue;
            }
            let task = self.make_task(job, url, TaskKind::Enumerated, context, 0);
            self.push(task.clone());
            tasks.push(task);
        }
        tasks
    }

    /// Chains one discovered task to a "next page" link
    ///
    /// The link is resolved against the parent URL. Returns `None` (and logs)
    /// when the link is unusable, was already crawled in this run, or the
    /// job's page cap is reached.
    pub fn ingest_discovered(&mut self, parent: &FetchTask, next_link: &str) -> Option<FetchTask> {
        let url = match resolve_link(&parent.url, next_link) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    "Task {}: ignoring unusable next link {:?}: {}",
                    parent.id,
                    next_link,
                    e
                );
                return None;
            }
        };

        let cap = self.page_caps.get(&parent.job).copied().unwrap_or(u32::MAX);
        let count = self.discovered.get(&parent.job).copied().unwrap_or(0);
        if count >= cap {
            tracing::warn!(
                "Job {}: page cap of {} reached, not following {}",
                parent.job,
                cap,
                url
            );
            return None;
        }

        if !self
            .seen
            .insert((parent.job.clone(), url.as_str().to_string()))
        {
            tracing::debug!("Job {}: next link {} already crawled", parent.job, url);
            return None;
        }

        self.discovered.insert(parent.job.clone(), count + 1);

        let task = self.make_task(
            &parent.job,
            url,
            TaskKind::Discovered,
            parent.context.clone(),
            parent.page + 1,
        );
        self.push(task.clone());
        Some(task)
    }

    fn make_task(
        &mut self,
        job: &str,
        url: Url,
        kind: TaskKind,
        context: Fields,
        page: u32,
    ) -> FetchTask {
        self.next_id += 1;
        FetchTask {
            id: TaskId(self.next_id),
            job: job.to_string(),
            url,
            kind,
            context,
            retry_count: 0,
            page,
        }
    }

    fn push(&mut self, task: FetchTask) {
        self.queues
            .entry(domain_key(&task.url))
            .or_default()
            .push_back(task);
        self.pending += 1;
    }

    /// Removes the oldest pending task whose domain `admit` accepts
    ///
    /// `admit` is asked about domains in the age order of their oldest task
    /// and returns what the task needs to start (a permit, typically). A
    /// domain it turns down keeps its tasks queued without holding back the
    /// other domains. Within a domain, tasks leave in FIFO order.
    pub fn pop_admitted<T, F>(&mut self, mut admit: F) -> Option<(FetchTask, T)>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let mut heads: Vec<(TaskId, &String)> = self
            .queues
            .iter()
            .filter_map(|(domain, queue)| queue.front().map(|task| (task.id, domain)))
            .collect();
        heads.sort_unstable();

        let (domain, admitted) = heads
            .into_iter()
            .find_map(|(_, domain)| admit(domain).map(|admitted| (domain.clone(), admitted)))?;

        let queue = self.queues.get_mut(&domain)?;
        let task = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&domain);
        }
        self.pending -= 1;
        Some((task, admitted))
    }

    /// Drops every pending task, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.pending;
        self.queues.clear();
        self.pending = 0;
        n
    }

    /// Returns the number of pending tasks
    pub fn len(&self) -> usize {
        self.pending
    }

    /// Returns whether the frontier is empty
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }
}
