//! Voxmark Server Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod annotation;
pub mod config;
pub mod protocol;
pub mod segmentation;
pub mod server;
pub mod session;
pub mod volume;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use server::{AppState, api_routes};
pub use session::manager::SessionManager;
pub use session::state::SessionState;
pub use session::types::{SessionConfig, SessionError};
pub use volume::{Axis, Dims, VolumeDecoder, VolumeHandle};
