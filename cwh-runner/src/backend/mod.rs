//! Media backends
//!
//! The harness only needs [`MediaBackend`](crate::player::MediaBackend). The
//! simulated backend drives a player and surface on tokio time so runs are
//! reproducible without a real media stack.

pub mod simulated;

pub use simulated::{ContentProfile, ManifestKind, SimulatedBackend, SimulationConfig};
