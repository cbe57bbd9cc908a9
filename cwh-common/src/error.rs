//! Common error types for CWH

use thiserror::Error;

/// Common result type for CWH operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the harness crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}
