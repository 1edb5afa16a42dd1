//! JSON error responses for the HTTP API

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::extract::SESSION_HEADER;
use crate::session::SessionError;

/// Error response for the API
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    /// Session the client should use from now on, when it changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ApiError {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
            session_id: None,
        }
    }

    /// The presented session is gone; `replacement` was provisioned instead
    pub fn stale_session(stale_id: &str, replacement: &str) -> Self {
        Self {
            error: format!(
                "Session {} not found; continue with the new session",
                stale_id
            ),
            code: "session_not_found".to_string(),
            session_id: Some(replacement.to_string()),
        }
    }

    pub fn validation(field: &str, message: impl std::fmt::Display) -> Self {
        Self::new("validation_error", format!("Invalid {}: {}", field, message))
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            "payload_too_large",
            format!("Upload exceeds the {} byte limit", limit),
        )
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "session_not_found" | "point_not_found" => StatusCode::NOT_FOUND,
            "out_of_range" | "validation_error" | "no_volume" | "no_points" => {
                StatusCode::BAD_REQUEST
            }
            "payload_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
            "decode_error" => StatusCode::UNPROCESSABLE_ENTITY,
            "not_ready" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let code = match &e {
            SessionError::SessionNotFound(_) => "session_not_found",
            SessionError::PointNotFound(_) => "point_not_found",
            SessionError::OutOfRange { .. } => "out_of_range",
            SessionError::Validation { .. } => "validation_error",
            SessionError::NoVolume => "no_volume",
            SessionError::NoPoints => "no_points",
            SessionError::Decode(_) => "decode_error",
            SessionError::Pipeline(_) => "pipeline_error",
            SessionError::NotReady(_) => "not_ready",
            SessionError::Internal(_) => "internal_error",
        };
        Self::new(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.error);
        }
        let header = self
            .session_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok());
        let mut response = (status, Json(self)).into_response();
        if let Some(value) = header {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_status_codes() {
        let cases = [
            (SessionError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (SessionError::PointNotFound(3), StatusCode::NOT_FOUND),
            (
                SessionError::OutOfRange {
                    field: "slice_index",
                    value: 9,
                    bound: 4,
                },
                StatusCode::BAD_REQUEST,
            ),
            (SessionError::NoVolume, StatusCode::BAD_REQUEST),
            (SessionError::NoPoints, StatusCode::BAD_REQUEST),
            (SessionError::Decode("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SessionError::NotReady("later".into()), StatusCode::CONFLICT),
            (
                SessionError::Pipeline("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
        assert_eq!(
            ApiError::payload_too_large(10).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_stale_session_carries_replacement_header() {
        let response = ApiError::stale_session("old", "new").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(SESSION_HEADER).unwrap(), "new");
    }

    #[test]
    fn test_out_of_range_message_names_field_and_bound() {
        let error = ApiError::from(SessionError::OutOfRange {
            field: "pixel.x",
            value: 70,
            bound: 64,
        });
        assert_eq!(error.code, "out_of_range");
        assert!(error.error.contains("pixel.x"));
        assert!(error.error.contains("64"));
    }
}
