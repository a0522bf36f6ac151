//! Multiplexed CSV sink
//!
//! Records name their destination store; the sink keeps one open CSV handle
//! per destination for the whole run. The first record written to a
//! destination that has any columns fixes them: later records are projected onto them
//! (missing fields empty, extra fields dropped). Metadata fields (leading `_`)
//! are never written.

use crate::config::OutputConfig;
use crate::state::{Record, RecordBatch};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// How a destination file is opened the first time it is written in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Truncate and always write the header
    Overwrite,
    /// Keep existing rows; write the header only into a new or empty file
    Append,
}

/// Errors that can occur while writing records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record has no destination")]
    MissingDestination,

    #[error("sink is closed")]
    Closed,

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {destination}: {source}")]
    Write {
        destination: String,
        source: csv::Error,
    },

    #[error("failed to flush {destination}: {source}")]
    Flush {
        destination: String,
        source: std::io::Error,
    },
}

/// Consumes extracted records
pub trait RecordSink: Send + Sync {
    /// Writes one record to its destination
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The record is written and flushed
    /// * `Err(SinkError)` - The sink contract was violated; the run must stop
    fn accept_record(&self, record: Record) -> Result<(), SinkError>;

    /// Writes records in order, stopping at the first failure
    fn accept_batch(&self, records: RecordBatch) -> Result<(), SinkError> {
        for record in records {
            self.accept_record(record)?;
        }
        Ok(())
    }

    /// Flushes and releases every handle
    ///
    /// Close failures are logged, never returned. Closing twice is a no-op.
    fn close(&self);

    /// Destinations written so far with their record counts
    fn destinations(&self) -> Vec<(String, u64)> {
        Vec::new()
    }
}

/// Where and how destination files are opened
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Directory relative destinations are resolved against
    pub base_dir: PathBuf,
    pub default_mode: OpenMode,
    pub modes_by_destination: HashMap<String, OpenMode>,
}

impl SinkOptions {
    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            default_mode: config.default_mode(),
            modes_by_destination: config.destinations.clone(),
        }
    }

    pub fn mode_for(&self, destination: &str) -> OpenMode {
        self.modes_by_destination
            .get(destination)
            .copied()
            .unwrap_or(self.default_mode)
    }

    /// Absolute destinations are used as-is
    pub fn path_for(&self, destination: &str) -> PathBuf {
        self.base_dir.join(destination)
    }
}

/// Open file plus the column order locked by its first non-empty record
struct SinkHandle {
    destination: String,
    path: PathBuf,
    columns: Vec<String>,
    /// Header still owed once the columns are known
    header_pending: bool,
    /// `None` once closed
    writer: Option<csv::Writer<File>>,
    written: u64,
    skipped: u64,
}

impl SinkHandle {
    fn open(options: &SinkOptions, destination: &str) -> Result<Self, SinkError> {
        let path = options.path_for(destination);
        let open_err = |source| SinkError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let mode = options.mode_for(destination);
        let header_pending = match mode {
            OpenMode::Overwrite => true,
            OpenMode::Append => is_missing_or_empty(&path),
        };

        let mut open = OpenOptions::new();
        match mode {
            OpenMode::Overwrite => open.write(true).create(true).truncate(true),
            OpenMode::Append => open.append(true).create(true),
        };
        let file = open.open(&path).map_err(open_err)?;

        tracing::info!("Opened {} ({:?})", path.display(), mode);
        Ok(Self {
            destination: destination.to_string(),
            path,
            columns: Vec::new(),
            header_pending,
            writer: Some(csv::WriterBuilder::new().has_headers(false).from_writer(file)),
            written: 0,
            skipped: 0,
        })
    }

    fn write_row<'a>(&mut self, row: impl Iterator<Item = &'a str>) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer
            .write_record(row)
            .map_err(|source| SinkError::Write {
                destination: self.destination.clone(),
                source,
            })?;
        writer.flush().map_err(|source| SinkError::Flush {
            destination: self.destination.clone(),
            source,
        })
    }

    /// Locks the columns on the first record that has any
    fn lock_columns(&mut self, record: &Record) -> Result<bool, SinkError> {
        if !self.columns.is_empty() {
            return Ok(true);
        }

        let columns = record.fields.column_names();
        if columns.is_empty() {
            self.skipped += 1;
            if self.skipped == 1 {
                tracing::warn!(
                    "{}: record has no columns to write, skipped until one does",
                    self.destination
                );
            }
            return Ok(false);
        }

        if self.header_pending {
            self.write_row(columns.iter().map(String::as_str))?;
            self.header_pending = false;
        }
        tracing::info!("{}: columns {}", self.path.display(), columns.join(","));
        self.columns = columns;
        Ok(true)
    }

    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        if self.writer.is_none() {
            return Err(SinkError::Closed);
        }
        if !self.lock_columns(record)? {
            return Ok(());
        }
        let columns = std::mem::take(&mut self.columns);
        let result = self.write_row(record.project(&columns));
        self.columns = columns;
        result?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Failed to flush {} on close: {}", self.path.display(), e);
            }
        }
        if self.skipped > 0 {
            tracing::warn!(
                "{}: {} records without columns were not written",
                self.destination,
                self.skipped
            );
        }
    }
}

fn is_missing_or_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

/// Per-destination slot; `None` until the file is opened
type Slot = Arc<Mutex<Option<SinkHandle>>>;

/// [`RecordSink`] writing one CSV file per destination
///
/// The slot map lock is only held to look up or insert a slot. Opening a
/// file and writing to it happen under the slot's own lock, so distinct
/// destinations never wait on each other while work on one destination is
/// serialized.
pub struct CsvSink {
    options: SinkOptions,
    slots: Mutex<HashMap<String, Slot>>,
    closed: AtomicBool,
}

impl CsvSink {
    pub fn new(options: SinkOptions) -> Self {
        Self {
            options,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(SinkOptions::from_config(config))
    }

    fn slot(&self, destination: &str) -> Result<Slot, SinkError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        Ok(slots
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone())
    }

    fn opened_slots(&self) -> Vec<(String, Slot)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect()
    }

    /// Column order locked for a destination, if a record has fixed it
    pub fn columns(&self, destination: &str) -> Option<Vec<String>> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(destination)?.clone()
        };
        let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map(|handle| handle.columns.clone())
            .filter(|columns| !columns.is_empty())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl RecordSink for CsvSink {
    fn accept_record(&self, record: Record) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }

        let destination = record.destination.trim();
        if destination.is_empty() {
            return Err(SinkError::MissingDestination);
        }

        let slot = self.slot(destination)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            // Re-checked under the slot lock so nothing opens after close
            if self.is_closed() {
                return Err(SinkError::Closed);
            }
            *slot = Some(SinkHandle::open(&self.options, destination)?);
        }
        match slot.as_mut() {
            Some(handle) => handle.write(&record),
            None => Err(SinkError::Closed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots = self.opened_slots();
        for (_, slot) in &slots {
            if let Some(handle) = slot.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
                handle.close();
            }
        }
        tracing::debug!("Closed {} output files", slots.len());
    }

    /// Sorted by destination name
    fn destinations(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<_> = self
            .opened_slots()
            .into_iter()
            .filter_map(|(name, slot)| {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                slot.as_ref().map(|handle| (name, handle.written))
            })
            .collect();
        counts.sort();
        counts
    }
}
