use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationPoint, Rgb};
use crate::segmentation::ArtifactSummary;
use crate::session::SessionStatus;
use crate::volume::{Axis, Pixel, VolumeSummary, Voxel};

// ============================================================================
// Requests
// ============================================================================

/// Query string of POST /api/upload
#[derive(Debug, Clone, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

/// Body of POST /api/mark_point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPointRequest {
    pub axis: Axis,
    pub slice_index: i64,
    pub point: Pixel,
    /// Explicit number; assigned automatically when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_number: Option<i64>,
}

/// Body of POST /api/view/axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAxisRequest {
    /// +1 steps forward through Sagittal, Coronal, Axial; -1 steps back
    pub direction: i32,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDeletedResponse {
    pub session_id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub total: usize,
    pub sessions: Vec<SessionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub message: String,
    #[serde(flatten)]
    pub volume: VolumeSummary,
}

/// A marked point as drawn on a slice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicePoint {
    pub x: i64,
    pub y: i64,
    pub point_number: u8,
    pub color: Rgb,
}

impl From<&AnnotationPoint> for SlicePoint {
    fn from(p: &AnnotationPoint) -> Self {
        Self {
            x: p.pixel.x,
            y: p.pixel.y,
            point_number: p.point_number,
            color: p.color,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceResponse {
    pub session_id: String,
    pub axis: Axis,
    pub slice_index: usize,
    pub max_slices: usize,
    pub height: usize,
    pub width: usize,
    /// Row-major display values, 0-255
    pub rows: Vec<Vec<u8>>,
    pub points: Vec<SlicePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewResponse {
    pub session_id: String,
    pub current_axis: Axis,
    pub current_slice: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkPointResponse {
    pub session_id: String,
    pub message: String,
    pub point_number: u8,
    pub voxel: Voxel,
    pub color: Rgb,
    pub total_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovePointResponse {
    pub session_id: String,
    pub point_number: i64,
    pub total_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearPointsResponse {
    pub session_id: String,
    pub previous_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointsResponse {
    pub session_id: String,
    pub total_points: usize,
    pub points: Vec<AnnotationPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentationResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    /// The result reflects the points as they are now
    pub up_to_date: bool,
    /// The result became the session's artifact
    pub installed: bool,
    #[serde(flatten)]
    pub artifact: ArtifactSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_sessions: usize,
    pub uptime_seconds: u64,
}
