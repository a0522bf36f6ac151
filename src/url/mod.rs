//! URL handling module for paddock
//!
//! This module provides domain extraction (the unit the dispatcher bounds
//! concurrency by), identifier template expansion and link resolution.

mod domain;
mod template;

// Re-export main functions
pub use domain::domain_key;
pub use template::{expand_template, resolve_link, ID_PLACEHOLDER};
