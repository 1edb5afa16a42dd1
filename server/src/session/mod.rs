//! Session module: per-user state and the registry that owns it

pub mod manager;
pub mod scratch;
pub mod state;
pub mod types;

pub use manager::{Resolution, Resolved, SessionManager};
pub use scratch::{DiskScratch, ScratchError, ScratchSpace};
pub use state::{SegmentationReport, SessionState, SliceView, WorkGuard};
pub use types::{
    SessionConfig, SessionError, SessionId, SessionStatus, ViewState, generate_session_id,
    now_millis, validate_session_id,
};
