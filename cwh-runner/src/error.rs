//! Error types for cwh-runner
//!
//! Every error maps to exactly one [`FailureCategory`] so a failed scenario can
//! be reported as `failed(category, detail)`.

use cwh_common::PlayerErrorDetail;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for cwh-runner
#[derive(Error, Debug)]
pub enum Error {
    /// Error raised by the player collaborator (event or failed call)
    #[error("Player error: {0}")]
    Player(PlayerErrorDetail),

    /// Content could not be loaded (unsupported or unreachable)
    #[error("Load error: {0}")]
    Load(PlayerErrorDetail),

    /// A Waiter condition was not met before its deadline
    #[error("Timed out after {timeout:?} waiting for {label}")]
    WaitTimeout { label: String, timeout: Duration },

    /// A Waiter request was cancelled before it resolved
    #[error("Wait for {0} was cancelled")]
    WaitCancelled(String),

    /// Scenario configuration rejected before load began
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A post-load expectation did not hold
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Shared library error (config loading, I/O)
    #[error(transparent)]
    Common(#[from] cwh_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using cwh-runner Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure category reported for a failed scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    PlayerError,
    WaitTimeout,
    ConfigurationError,
    AssertionFailed,
    /// Panics and cancellations with no recorded cause
    Unexpected,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::PlayerError => write!(f, "PlayerError"),
            FailureCategory::WaitTimeout => write!(f, "WaitTimeout"),
            FailureCategory::ConfigurationError => write!(f, "ConfigurationError"),
            FailureCategory::AssertionFailed => write!(f, "AssertionFailed"),
            FailureCategory::Unexpected => write!(f, "Unexpected"),
        }
    }
}

impl Error {
    pub fn category(&self) -> FailureCategory {
        match self {
            Error::Player(_) | Error::Load(_) => FailureCategory::PlayerError,
            Error::WaitTimeout { .. } => FailureCategory::WaitTimeout,
            Error::Configuration(_) | Error::Common(_) => FailureCategory::ConfigurationError,
            Error::Assertion(_) => FailureCategory::AssertionFailed,
            Error::WaitCancelled(_) | Error::Io(_) | Error::Internal(_) => {
                FailureCategory::Unexpected
            }
        }
    }

    /// Detail string for reports
    ///
    /// Player errors are surfaced verbatim; everything else uses its Display.
    pub fn detail(&self) -> String {
        match self {
            Error::Player(detail) | Error::Load(detail) => detail.to_string(),
            other => other.to_string(),
        }
    }
}
