//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use bytes::Bytes;
use dicom_core::value::C;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;
use voxmark_server::segmentation::ThresholdGrowPipeline;
use voxmark_server::session::{DiskScratch, SessionConfig, SessionManager};
use voxmark_server::volume::{Dims, IDENTITY_AFFINE, Voxel, nifti};
use voxmark_server::{AppState, api_routes};

pub const SESSION_HEADER: &str = "x-session-id";

/// A router over real collaborators with scratch files in a private directory
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub scratch_root: PathBuf,
}

impl TestApp {
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.state.manager
    }

    pub fn scratch_dir(&self, session_id: &str) -> PathBuf {
        self.scratch_root.join(session_id)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch_root);
    }
}

/// Create a test application with default session settings
pub fn create_test_app() -> TestApp {
    create_test_app_with_config(SessionConfig::default())
}

/// Create a test application with the given session settings.
///
/// The segmentation engine uses a low threshold so `blob_volume` fixtures
/// segment.
pub fn create_test_app_with_config(config: SessionConfig) -> TestApp {
    let scratch_root =
        std::env::temp_dir().join(format!("voxmark-it-{}", uuid::Uuid::new_v4().simple()));
    let manager = Arc::new(SessionManager::new(
        config,
        Arc::new(DiskScratch::new(&scratch_root)),
    ));
    let state = AppState::new(manager)
        .with_pipeline(Arc::new(ThresholdGrowPipeline::new(3, 50.0)));
    let router = api_routes(state.clone());
    TestApp {
        router,
        state,
        scratch_root,
    }
}

/// Session settings that expire sessions almost immediately
pub fn short_lived_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(1),
        reclaim_interval: Duration::from_secs(3600),
    }
}

/// Captured HTTP response
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn session_id(&self) -> String {
        self.headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(app: &TestApp, request: Request<Body>) -> TestResponse {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

fn builder(method: &str, uri: &str, session_id: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match session_id {
        Some(id) => builder.header(SESSION_HEADER, id),
        None => builder,
    }
}

pub async fn get(app: &TestApp, uri: &str, session_id: Option<&str>) -> TestResponse {
    let request = builder("GET", uri, session_id).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn delete(app: &TestApp, uri: &str, session_id: Option<&str>) -> TestResponse {
    let request = builder("DELETE", uri, session_id)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(
    app: &TestApp,
    uri: &str,
    session_id: Option<&str>,
    body: serde_json::Value,
) -> TestResponse {
    let request = builder("POST", uri, session_id)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &TestApp, uri: &str, session_id: Option<&str>) -> TestResponse {
    let request = builder("POST", uri, session_id)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn upload(
    app: &TestApp,
    session_id: Option<&str>,
    filename: &str,
    bytes: Bytes,
) -> TestResponse {
    let request = builder(
        "POST",
        &format!("/api/upload?filename={}", filename),
        session_id,
    )
    .header("Content-Type", "application/octet-stream")
    .body(Body::from(bytes))
    .unwrap();
    send(app, request).await
}

/// Mark a point on an axial slice
pub async fn mark(
    app: &TestApp,
    session_id: &str,
    slice_index: i64,
    x: i64,
    y: i64,
    point_number: Option<i64>,
) -> TestResponse {
    let mut body = serde_json::json!({
        "axis": 2,
        "slice_index": slice_index,
        "point": {"x": x, "y": y},
    });
    if let Some(n) = point_number {
        body["point_number"] = n.into();
    }
    post_json(app, "/api/mark_point", Some(session_id), body).await
}

/// Upload a fresh volume into a new session and return its id
pub async fn session_with_volume(app: &TestApp, dims: Dims) -> String {
    let response = upload(app, None, "scan.nii.gz", blob_volume(dims, &[])).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    response.session_id()
}

/// Sorted names of the files in a session's scratch directory
pub fn scratch_files(app: &TestApp, session_id: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(app.scratch_dir(session_id))
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Gzipped NIfTI volume: background 10, with a bright (200) cube of
/// half-width 1 around each centre
pub fn blob_volume(dims: Dims, centres: &[Voxel]) -> Bytes {
    let mut data = vec![10u8; dims.voxel_count()];
    for centre in centres {
        for z in centre.z.saturating_sub(1)..(centre.z + 2).min(dims.0[2]) {
            for y in centre.y.saturating_sub(1)..(centre.y + 2).min(dims.0[1]) {
                for x in centre.x.saturating_sub(1)..(centre.x + 2).min(dims.0[0]) {
                    data[dims.offset(Voxel::new(x, y, z))] = 200;
                }
            }
        }
    }
    Bytes::from(nifti::write_u8_gz(dims, &IDENTITY_AFFINE, &data).unwrap())
}

/// Minimal 16-bit grayscale DICOM slice
pub fn dicom_slice(instance: i32, rows: u16, columns: u16, samples: &[u16]) -> Vec<u8> {
    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    let uid = format!("2.25.{}", 5000 + instance);
    let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(CT_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(uid.as_str())),
        DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from(instance.to_string()),
        ),
        us(tags::SAMPLES_PER_PIXEL, 1),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        us(tags::ROWS, rows),
        us(tags::COLUMNS, columns),
        us(tags::BITS_ALLOCATED, 16),
        us(tags::BITS_STORED, 16),
        us(tags::HIGH_BIT, 15),
        us(tags::PIXEL_REPRESENTATION, 0),
        DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(C::from_vec(samples.to_vec())),
        ),
    ]);
    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(uid.as_str()),
        )
        .unwrap();
    let mut out = Vec::new();
    file.write_all(&mut out).unwrap();
    out
}

/// Zip archive of the given members
pub fn zip_archive(members: &[(&str, &[u8])]) -> Bytes {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}
