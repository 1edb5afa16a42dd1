//! Test Utilities Module
//!
//! Fixtures, fake collaborators, and an in-process router for testing the
//! voxmark server. This module is only compiled when running tests.

#![cfg(test)]

use crate::annotation::AnnotationPoint;
use crate::segmentation::{PipelineError, SegmentationOutput, SegmentationPipeline};
use crate::server::{AppState, api_routes};
use crate::session::manager::SessionManager;
use crate::session::scratch::{ScratchError, ScratchSpace};
use crate::session::types::SessionConfig;
use crate::volume::{Dims, IDENTITY_AFFINE, VolumeHandle, Voxel, nifti};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tower::util::ServiceExt;

// ============================================================================
// Test Context
// ============================================================================

/// Test context that holds the application state and its router
pub struct TestContext {
    pub app_state: AppState,
    pub router: Router,
    pub scratch: Arc<CountingScratch>,
}

/// Captured HTTP response
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Response body is not the expected JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestContext {
    /// Create a new test context with default state
    pub fn new() -> Self {
        Self::with_state(|state| state)
    }

    /// Create a context, letting the caller swap collaborators in
    pub fn with_state(customize: impl FnOnce(AppState) -> AppState) -> Self {
        let scratch = Arc::new(CountingScratch::default());
        let manager = Arc::new(SessionManager::new(
            SessionConfig::default(),
            scratch.clone(),
        ));
        let app_state = customize(AppState::new(manager));
        let router = api_routes(app_state.clone());
        Self {
            app_state,
            router,
            scratch,
        }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.app_state.manager
    }

    /// Make an HTTP request to the test router
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Make a request carrying an optional session header
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        session_id: Option<&str>,
        body: Body,
        content_type: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = session_id {
            builder = builder.header("x-session-id", id);
        }
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        let request = builder.body(body).expect("Failed to build request");
        self.request(request).await
    }

    pub async fn get(&self, uri: &str, session_id: Option<&str>) -> TestResponse {
        self.send("GET", uri, session_id, Body::empty(), None).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        session_id: Option<&str>,
        body: serde_json::Value,
    ) -> TestResponse {
        let bytes = serde_json::to_vec(&body).expect("Failed to serialize body");
        self.send(
            "POST",
            uri,
            session_id,
            Body::from(bytes),
            Some("application/json"),
        )
        .await
    }

    /// Upload a volume through the query-string API
    pub async fn upload(&self, session_id: Option<&str>, filename: &str, bytes: Bytes) -> TestResponse {
        self.send(
            "POST",
            &format!("/api/upload?filename={}", filename),
            session_id,
            Body::from(bytes),
            Some("application/octet-stream"),
        )
        .await
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scratch Space
// ============================================================================

/// In-memory scratch space that records what was written and released
#[derive(Default)]
pub struct CountingScratch {
    persisted: Mutex<HashMap<String, Vec<String>>>,
    released: Mutex<HashMap<String, usize>>,
}

impl CountingScratch {
    pub fn release_count(&self, session_id: &str) -> usize {
        self.released
            .lock()
            .unwrap()
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Files currently stored for a session, in write order
    pub fn persisted(&self, session_id: &str) -> Vec<String> {
        self.persisted
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ScratchSpace for CountingScratch {
    fn persist(&self, session_id: &str, name: &str, _bytes: &[u8]) -> Result<PathBuf, ScratchError> {
        let mut persisted = self.persisted.lock().unwrap();
        let files = persisted.entry(session_id.to_string()).or_default();
        if !files.iter().any(|f| f == name) {
            files.push(name.to_string());
        }
        Ok(PathBuf::from(session_id).join(name))
    }

    fn remove(&self, session_id: &str, name: &str) -> Result<(), ScratchError> {
        if let Some(files) = self.persisted.lock().unwrap().get_mut(session_id) {
            files.retain(|f| f != name);
        }
        Ok(())
    }

    fn release(&self, session_id: &str) -> Result<(), ScratchError> {
        *self
            .released
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default() += 1;
        Ok(())
    }
}

// ============================================================================
// Volumes
// ============================================================================

/// Volume whose value at (x, y, z) is x + 10y + 100z
pub fn ramp_volume(dims: Dims) -> VolumeHandle {
    VolumeHandle::new("ramp.nii", "nifti", dims, IDENTITY_AFFINE, ramp_samples(dims))
        .expect("Failed to build ramp volume")
}

fn ramp_samples(dims: Dims) -> Vec<f32> {
    let mut data = vec![0.0; dims.voxel_count()];
    for z in 0..dims.0[2] {
        for y in 0..dims.0[1] {
            for x in 0..dims.0[0] {
                let v = Voxel::new(x, y, z);
                data[dims.offset(v)] = (x + 10 * y + 100 * z) as f32;
            }
        }
    }
    data
}

/// Gzipped NIfTI file with a small repeating intensity pattern
pub fn nifti_upload(dims: Dims) -> Bytes {
    let data: Vec<u8> = (0..dims.voxel_count()).map(|i| (i % 251) as u8).collect();
    let encoded =
        nifti::write_u8_gz(dims, &IDENTITY_AFFINE, &data).expect("Failed to encode NIfTI");
    Bytes::from(encoded)
}

// ============================================================================
// Pipelines
// ============================================================================

/// Engine that always fails
pub struct FailingPipeline;

#[async_trait]
impl SegmentationPipeline for FailingPipeline {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn segment(
        &self,
        _volume: Arc<VolumeHandle>,
        _points: Vec<AnnotationPoint>,
    ) -> Result<SegmentationOutput, PipelineError> {
        Err(PipelineError::Engine("engine crashed".to_string()))
    }
}

/// Engine that blocks until the test opens its gate.
///
/// Labels exactly the voxel under each point with that point's number.
pub struct GatedPipeline {
    started: Notify,
    gate: Semaphore,
}

impl Default for GatedPipeline {
    fn default() -> Self {
        Self {
            started: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

impl GatedPipeline {
    /// Wait until a run has entered the engine
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let every pending and future run complete
    pub fn open(&self) {
        self.gate.add_permits(1024);
    }
}

#[async_trait]
impl SegmentationPipeline for GatedPipeline {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn segment(
        &self,
        volume: Arc<VolumeHandle>,
        points: Vec<AnnotationPoint>,
    ) -> Result<SegmentationOutput, PipelineError> {
        self.started.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))?;

        let dims = volume.dims();
        let mut labels = vec![0u8; dims.voxel_count()];
        let mut label_mapping = BTreeMap::new();
        for point in &points {
            labels[dims.offset(point.voxel)] = point.point_number;
            label_mapping.insert(point.point_number, point.point_number);
        }
        Ok(SegmentationOutput {
            labels,
            label_mapping,
        })
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxmark_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// Tests for Test Utilities
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_creation() {
        let ctx = TestContext::new();
        assert_eq!(ctx.session_manager().session_count().await, 0);
    }

    #[test]
    fn test_ramp_volume_values() {
        let volume = ramp_volume(Dims::new(4, 3, 2));
        assert_eq!(volume.value(Voxel::new(3, 2, 1)), 123.0);
        assert_eq!(volume.intensity_range(), (0.0, 123.0));
    }

    #[test]
    fn test_nifti_upload_decodes() {
        let bytes = nifti_upload(Dims::new(4, 3, 2));
        assert!(nifti::is_gzip(&bytes));
    }

    #[test]
    fn test_counting_scratch_tracks_sessions() {
        let scratch = CountingScratch::default();
        scratch.persist("a", "scan.nii", b"x").unwrap();
        scratch.persist("a", "old.nii", b"x").unwrap();
        scratch.remove("a", "old.nii").unwrap();
        scratch.release("a").unwrap();
        assert_eq!(scratch.persisted("a"), vec!["scan.nii".to_string()]);
        assert_eq!(scratch.release_count("a"), 1);
        assert_eq!(scratch.release_count("b"), 0);
    }
}
