//! # Content Workaround Harness (cwh-runner)
//!
//! Drives a media player through attach → configure → load → play → unload →
//! destroy for every scenario of a matrix and reports passed, failed or skipped.
//!
//! **Building blocks:**
//! - [`event_manager`]: scoped listener registry, released in bulk at teardown
//! - [`waiter`]: deadline-bounded waits on playhead movement and progress
//! - [`scenario`]: scenario descriptions, skip predicates and the built-in matrix
//! - [`lifecycle`]: per-scenario sequencing with fail-fast error handling
//!
//! The player is only reached through the traits in [`player`], so any backend
//! (including [`backend::simulated`]) can be substituted.

pub mod backend;
pub mod config;
pub mod error;
pub mod event_manager;
pub mod lifecycle;
pub mod player;
pub mod report;
pub mod scenario;
pub mod waiter;

pub use error::{Error, FailureCategory, Result};
pub use lifecycle::{LifecycleOptions, ScenarioContext, TestLifecycle};
