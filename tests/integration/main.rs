//! Integration tests for Sumi-Harvest
//!
//! These tests drive full jobs against scripted collaborators and real
//! checkpoint files in temporary directories.

mod crawl_tests;
mod store_tests;
mod support;
