//! Module system tests
//!
//! Tests for registry lifecycle rules, the batch scheduler, the manager and
//! the process-isolated backend.

pub mod lifecycle_tests;
pub mod scheduler_tests;
