//! HTTP surface: application state, session resolution and route handlers

pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use extract::{ActiveSession, SESSION_CREATED_HEADER, SESSION_HEADER, SessionHeaders};
pub use routes::api_routes;
pub use state::{AppState, DEFAULT_MAX_UPLOAD_BYTES};
