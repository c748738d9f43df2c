//! Shared test utilities for mediaflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs over temp directories
//! - In-process operations used as stand-ins for real media tools

pub mod harness;
pub mod operations;

pub use harness::TestHarness;
