//! HTTP route handlers for the session API

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Path, Query, State,
        rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;

use super::error::ApiError;
use super::extract::{ActiveSession, SessionHeaders};
use super::state::AppState;
use crate::annotation::{PaletteEntry, color_template};
use crate::protocol::{
    ChangeAxisRequest, ClearPointsResponse, HealthResponse, MarkPointRequest, MarkPointResponse,
    PointsResponse, RemovePointResponse, SegmentationResponse, SessionCreatedResponse,
    SessionDeletedResponse, SessionListResponse, SlicePoint, SliceResponse, UploadQuery,
    UploadResponse, ViewResponse,
};
use crate::segmentation::DownloadKind;
use crate::session::{SessionError, SessionStatus};
use crate::volume::Axis;

type ApiResult<T> = Result<(SessionHeaders, Json<T>), ApiError>;

/// Build the API router
pub fn api_routes(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/session", post(create_session))
        .route("/api/session/:id", delete(delete_session))
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/slice/:axis/:index", get(get_slice))
        .route("/api/slice/:axis/:index/png", get(get_slice_png))
        .route("/api/view/axis", post(change_axis))
        .route("/api/mark_point", post(mark_point))
        .route("/api/remove_point/:point_number", delete(remove_point))
        .route("/api/points", get(list_points).delete(clear_points))
        .route("/api/run_segmentation", post(run_segmentation))
        .route("/api/download/:kind", get(download))
        .route("/api/status", get(status))
        .route("/api/color_template", get(get_color_template))
        .with_state(state)
}

/// GET /health - Liveness and basic counters
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.manager.session_count().await,
        uptime_seconds: state.uptime_seconds(),
    })
}

/// POST /api/session - Provision a session explicitly
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, SessionHeaders, Json<SessionCreatedResponse>) {
    let session = state.manager.create().await;
    let headers = SessionHeaders {
        session_id: session.id().to_string(),
        created: true,
    };
    (
        StatusCode::CREATED,
        headers,
        Json(SessionCreatedResponse {
            session_id: session.id().to_string(),
            created_at: session.created_at(),
        }),
    )
}

/// DELETE /api/session/:id - Remove a session and its scratch files
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDeletedResponse>, ApiError> {
    state.manager.delete(&id).await.map_err(|e| {
        tracing::debug!("Delete of session {} failed: {}", id, e);
        ApiError::from(e)
    })?;
    Ok(Json(SessionDeletedResponse {
        session_id: id,
        deleted: true,
    }))
}

/// GET /api/sessions - Read-only listing of live sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.manager.list_sessions().await;
    Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    })
}

/// POST /api/upload?filename= - Load a volume into the session
pub async fn upload(
    State(state): State<AppState>,
    active: ActiveSession,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<UploadResponse> {
    let Query(query) = query.map_err(|e| active.fail(ApiError::validation("filename", e.body_text())))?;
    if query.filename.trim().is_empty() {
        return Err(active.fail(ApiError::validation("filename", "must not be empty")));
    }

    let bytes = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            active.fail(ApiError::payload_too_large(state.max_upload_bytes))
        } else {
            active.fail(ApiError::validation("body", e.body_text()))
        }
    })?;
    if bytes.len() > state.max_upload_bytes {
        return Err(active.fail(ApiError::payload_too_large(state.max_upload_bytes)));
    }
    if bytes.is_empty() {
        return Err(active.fail(ApiError::validation("body", "upload is empty")));
    }

    tracing::info!(
        "Upload of {} ({} bytes) into session {}",
        query.filename,
        bytes.len(),
        active.session.id()
    );
    let volume = active
        .session
        .ingest(state.decoder.clone(), query.filename, bytes)
        .await
        .map_err(|e| {
            tracing::warn!("Upload into session {} failed: {}", active.session.id(), e);
            active.fail(e)
        })?;

    Ok((
        active.headers(),
        Json(UploadResponse {
            session_id: active.id(),
            message: format!("Loaded {}", volume.filename),
            volume,
        }),
    ))
}

fn slice_path(path: Result<Path<(i64, i64)>, PathRejection>) -> Result<(Axis, i64), ApiError> {
    let Path((axis, index)) = path.map_err(|e| ApiError::validation("path", e.body_text()))?;
    let axis = Axis::try_from(axis).map_err(SessionError::from)?;
    Ok((axis, index))
}

/// GET /api/slice/:axis/:index - Slice pixels with the points marked on it
pub async fn get_slice(
    active: ActiveSession,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<SliceResponse> {
    let (axis, index) = slice_path(path).map_err(|e| active.fail(e))?;
    let view = active
        .session
        .read_slice(axis, index)
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(SliceResponse {
            session_id: active.id(),
            axis,
            slice_index: view.image.index,
            max_slices: view.max_slices,
            height: view.image.height,
            width: view.image.width,
            rows: view.image.rows(),
            points: view.points.iter().map(SlicePoint::from).collect(),
        }),
    ))
}

/// GET /api/slice/:axis/:index/png - Slice as a grayscale PNG
pub async fn get_slice_png(
    State(state): State<AppState>,
    active: ActiveSession,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Response, ApiError> {
    let (axis, index) = slice_path(path).map_err(|e| active.fail(e))?;
    let (volume, index) = active
        .session
        .slice_for_render(axis, index)
        .await
        .map_err(|e| active.fail(e))?;
    let png = state
        .slice_cache
        .get_or_render(&volume, axis, index)
        .await
        .map_err(|e| active.fail(SessionError::from(e)))?;

    Ok((
        active.headers(),
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        png,
    )
        .into_response())
}

/// POST /api/view/axis - Step the viewing axis
pub async fn change_axis(
    active: ActiveSession,
    body: Result<Json<ChangeAxisRequest>, JsonRejection>,
) -> ApiResult<ViewResponse> {
    let Json(request) = body.map_err(|e| active.fail(ApiError::validation("body", e.body_text())))?;
    let view = active
        .session
        .change_axis(request.direction)
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(ViewResponse {
            session_id: active.id(),
            current_axis: view.current_axis,
            current_slice: view.current_slice,
        }),
    ))
}

/// POST /api/mark_point - Place or move a numbered point
pub async fn mark_point(
    active: ActiveSession,
    body: Result<Json<MarkPointRequest>, JsonRejection>,
) -> ApiResult<MarkPointResponse> {
    let Json(request) = body.map_err(|e| active.fail(ApiError::validation("body", e.body_text())))?;
    let (point, total_points) = active
        .session
        .mark_point(
            request.axis,
            request.slice_index,
            request.point,
            request.point_number,
        )
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(MarkPointResponse {
            session_id: active.id(),
            message: format!("Point {} marked", point.point_number),
            point_number: point.point_number,
            voxel: point.voxel,
            color: point.color,
            total_points,
        }),
    ))
}

/// DELETE /api/remove_point/:point_number
pub async fn remove_point(
    active: ActiveSession,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<RemovePointResponse> {
    let Path(point_number) =
        path.map_err(|e| active.fail(ApiError::validation("point_number", e.body_text())))?;
    let total_points = active
        .session
        .remove_point(point_number)
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(RemovePointResponse {
            session_id: active.id(),
            point_number,
            total_points,
        }),
    ))
}

/// DELETE /api/points - Remove every point
pub async fn clear_points(active: ActiveSession) -> ApiResult<ClearPointsResponse> {
    let previous_total = active
        .session
        .clear_points()
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(ClearPointsResponse {
            session_id: active.id(),
            previous_total,
        }),
    ))
}

/// GET /api/points
pub async fn list_points(active: ActiveSession) -> ApiResult<PointsResponse> {
    let points = active
        .session
        .list_points()
        .await
        .map_err(|e| active.fail(e))?;

    Ok((
        active.headers(),
        Json(PointsResponse {
            session_id: active.id(),
            total_points: points.len(),
            points,
        }),
    ))
}

/// POST /api/run_segmentation - Segment the volume from the current points
pub async fn run_segmentation(
    State(state): State<AppState>,
    active: ActiveSession,
) -> ApiResult<SegmentationResponse> {
    let report = active
        .session
        .run_segmentation(state.pipeline.clone())
        .await
        .map_err(|e| active.fail(e))?;

    let message = if report.up_to_date {
        format!(
            "Segmentation completed with {} labels",
            report.artifact.unique_labels.len()
        )
    } else {
        "Segmentation completed, but points changed while it ran; run it again to include them"
            .to_string()
    };
    Ok((
        active.headers(),
        Json(SegmentationResponse {
            session_id: active.id(),
            status: "completed".to_string(),
            message,
            up_to_date: report.up_to_date,
            installed: report.installed,
            artifact: report.artifact,
        }),
    ))
}

/// GET /api/download/:kind - Export of the current segmentation
pub async fn download(
    active: ActiveSession,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind: DownloadKind = kind
        .parse()
        .map_err(|e: String| active.fail(ApiError::validation("kind", e)))?;
    let file = active
        .session
        .download(kind)
        .await
        .map_err(|e| active.fail(e))?;

    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        active.headers(),
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}

/// GET /api/status - Status of the caller's session
pub async fn status(active: ActiveSession) -> ApiResult<SessionStatus> {
    let status = active
        .session
        .snapshot_status()
        .await
        .map_err(|e| active.fail(e))?;
    Ok((active.headers(), Json(status)))
}

/// GET /api/color_template - Point palette
pub async fn get_color_template() -> Json<Vec<PaletteEntry>> {
    Json(color_template())
}
