use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::annotation::PointError;
use crate::segmentation::PipelineError;
use crate::volume::{Axis, VolumeError, VolumeSummary};

/// Session ID: 32 lowercase hex characters (a v4 UUID without dashes)
pub type SessionId = String;

const SESSION_ID_LENGTH: usize = 32;

/// Generate an unguessable session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4().simple().to_string()
}

/// Validation rules
pub fn validate_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LENGTH && id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Point {0} not found")]
    PointNotFound(i64),

    #[error("{field} {value} is out of range (valid: 0..{bound})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        bound: usize,
    },

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("No volume loaded")]
    NoVolume,

    #[error("No points marked")]
    NoPoints,

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Pipeline(String),

    #[error("{0}")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<VolumeError> for SessionError {
    fn from(e: VolumeError) -> Self {
        match e {
            VolumeError::OutOfRange {
                field,
                value,
                bound,
            } => SessionError::OutOfRange {
                field,
                value,
                bound,
            },
            VolumeError::UnsupportedFormat(_) => SessionError::Validation {
                field: "filename",
                message: e.to_string(),
            },
            VolumeError::EmptySeries(_) => SessionError::Validation {
                field: "file",
                message: e.to_string(),
            },
            VolumeError::Decode(_) => SessionError::Decode(e.to_string()),
            VolumeError::Encode(_) => SessionError::Internal(e.to_string()),
        }
    }
}

impl From<PointError> for SessionError {
    fn from(e: PointError) -> Self {
        match e {
            PointError::InvalidNumber(_) => SessionError::Validation {
                field: "point_number",
                message: e.to_string(),
            },
            PointError::NotFound(n) => SessionError::PointNotFound(n),
            PointError::OutOfBounds { .. } => SessionError::Validation {
                field: "voxel",
                message: e.to_string(),
            },
        }
    }
}

impl From<PipelineError> for SessionError {
    fn from(e: PipelineError) -> Self {
        SessionError::Pipeline(e.to_string())
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity window after which a session is reclaimed
    pub timeout: Duration,
    /// Period of the background reclamation pass
    pub reclaim_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            reclaim_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Current navigation position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub current_axis: Axis,
    pub current_slice: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            current_axis: Axis::Axial,
            current_slice: 0,
        }
    }
}

/// Read-only projection of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub created_at: u64,
    pub last_activity: u64,
    pub file_uploaded: bool,
    pub volume: Option<VolumeSummary>,
    pub total_points: usize,
    pub current_axis: Axis,
    pub current_slice: usize,
    pub segmentation_ready: bool,
    /// An artifact exists but was computed from an older point set
    pub segmentation_stale: bool,
    /// A long-running operation is in flight
    pub busy: bool,
}
