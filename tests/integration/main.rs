//! Integration tests for paddock
//!
//! These tests use wiremock to stand in for the crawled sites and tempfile
//! directories for identifier lists and output stores.

mod crawl_tests;
mod fetch_tests;
mod session_tests;
