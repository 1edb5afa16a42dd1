//! Session resolution from the `x-session-id` request header

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, request::Parts},
    response::{IntoResponseParts, ResponseParts},
};

use super::error::ApiError;
use super::state::AppState;
use crate::session::{Resolution, SessionState};

pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_CREATED_HEADER: &str = "x-session-created";

/// The session a request operates on.
///
/// A request without the header gets a fresh session. A request naming an
/// unknown or expired session is rejected with `session_not_found`; the
/// rejection carries the id of the session provisioned in its place.
pub struct ActiveSession {
    pub session: Arc<SessionState>,
    pub created: bool,
}

impl ActiveSession {
    pub fn id(&self) -> String {
        self.session.id().to_string()
    }

    /// Headers that tell the client which session served the request
    pub fn headers(&self) -> SessionHeaders {
        SessionHeaders {
            session_id: self.id(),
            created: self.created,
        }
    }

    /// Convert an operation failure, keeping the client informed of a
    /// session it has not seen yet
    pub fn fail(&self, error: impl Into<ApiError>) -> ApiError {
        let error: ApiError = error.into();
        error.with_session(self.created.then(|| self.id()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ActiveSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let resolved = state.manager.get_or_create(presented).await;
        match resolved.outcome {
            Resolution::Existing => Ok(Self {
                session: resolved.session,
                created: false,
            }),
            Resolution::Created => Ok(Self {
                session: resolved.session,
                created: true,
            }),
            Resolution::Replaced { stale_id } => Err(ApiError::stale_session(
                &stale_id,
                resolved.session.id(),
            )),
        }
    }
}

/// Response headers naming the serving session
pub struct SessionHeaders {
    pub session_id: String,
    pub created: bool,
}

impl IntoResponseParts for SessionHeaders {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Ok(value) = HeaderValue::from_str(&self.session_id) {
            res.headers_mut().insert(SESSION_HEADER, value);
        }
        if self.created {
            res.headers_mut()
                .insert(SESSION_CREATED_HEADER, HeaderValue::from_static("true"));
        }
        Ok(res)
    }
}
