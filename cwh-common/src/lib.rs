//! # CWH Common Library
//!
//! Shared code for the content-workaround harness crates:
//! - Error types
//! - Media event model (MediaEvent enum) and the EventTarget dispatcher
//! - Configuration file resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventTarget, ListenerId, MediaEvent, PlayerErrorDetail};
