//! Configuration module for paddock
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use paddock::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("paddock.toml")).unwrap();
//! for job in &config.jobs {
//!     println!("job {} writes {} record kinds", job.name, job.records.len());
//! }
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, FieldRule, JobConfig, OutputConfig, RecordRule, SessionConfig,
    ThrottleConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
