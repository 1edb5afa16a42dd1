use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::annotation::{AnnotationPoint, PointSet};
use crate::segmentation::{
    ArtifactSummary, DownloadKind, ExportedFile, SegmentationArtifact, SegmentationPipeline,
};
use crate::session::scratch::ScratchSpace;
use crate::session::types::{SessionError, SessionId, SessionStatus, ViewState, now_millis};
use crate::volume::{Axis, Pixel, SliceImage, VolumeDecoder, VolumeHandle, VolumeSummary};

/// Mutable content of a session, only reachable through the session lock
#[derive(Default)]
struct SessionContent {
    volume: Option<Arc<VolumeHandle>>,
    points: PointSet,
    artifact: Option<Arc<SegmentationArtifact>>,
    view: ViewState,
    /// Scratch copy of the upload behind `volume`
    upload_file: Option<String>,
    /// Scratch copies of the latest installed exports
    export_files: Vec<String>,
}

impl SessionContent {
    fn volume(&self) -> Result<&Arc<VolumeHandle>, SessionError> {
        self.volume.as_ref().ok_or(SessionError::NoVolume)
    }

    fn artifact_is_current(&self) -> bool {
        self.artifact
            .as_ref()
            .is_some_and(|a| a.points_revision == self.points.revision())
    }

    /// Swap in a new set of export files, returning the ones no longer in use
    fn replace_exports(&mut self, exported: Vec<String>) -> Vec<String> {
        let mut stale = std::mem::replace(&mut self.export_files, exported);
        stale.retain(|name| !self.export_files.contains(name));
        stale
    }

    fn invalidate_artifact(&mut self) {
        if self.artifact.take().is_some() {
            debug!("Segmentation artifact invalidated");
        }
    }
}

/// A slice ready for display, with the points marked on it
#[derive(Debug, Clone)]
pub struct SliceView {
    pub image: SliceImage,
    pub max_slices: usize,
    pub points: Vec<AnnotationPoint>,
}

/// Outcome of a segmentation run
#[derive(Debug, Clone)]
pub struct SegmentationReport {
    pub artifact: ArtifactSummary,
    /// The artifact was computed from the session's current points
    pub up_to_date: bool,
    /// False when a result from a later point set was already installed
    pub installed: bool,
}

/// One user's isolated workspace.
///
/// All content sits behind a per-session mutex. Activity time and the
/// in-flight counter are atomics so the reclaimer can inspect them without
/// taking the lock.
pub struct SessionState {
    id: SessionId,
    created_at: u64,
    last_activity: AtomicU64,
    in_flight: AtomicUsize,
    retired: AtomicBool,
    released: AtomicBool,
    scratch: Arc<dyn ScratchSpace>,
    content: Mutex<SessionContent>,
}

/// Marks a long operation as in flight for its lifetime.
///
/// Dropping the last guard of a retired session performs the deferred
/// release.
pub struct WorkGuard {
    session: Arc<SessionState>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let remaining = self.session.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.session.retired.load(Ordering::SeqCst) {
            let session = Arc::clone(&self.session);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { session.release().await });
                }
                Err(_) => warn!(
                    "No runtime to release session {}; scratch files left behind",
                    session.id
                ),
            }
        }
    }
}

impl SessionState {
    pub fn new(id: SessionId, scratch: Arc<dyn ScratchSpace>) -> Self {
        let now = now_millis();
        Self {
            id,
            created_at: now,
            last_activity: AtomicU64::new(now),
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            released: AtomicBool::new(false),
            scratch,
            content: Mutex::new(SessionContent::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Record activity now
    pub fn touch(&self) {
        self.last_activity.fetch_max(now_millis(), Ordering::SeqCst);
    }

    pub fn is_expired(&self, now: u64, timeout: Duration) -> bool {
        now.saturating_sub(self.last_activity()) > timeout.as_millis() as u64
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Take the session lock, refusing sessions already removed from the registry
    async fn lock_live(&self) -> Result<MutexGuard<'_, SessionContent>, SessionError> {
        let content = self.content.lock().await;
        if self.is_retired() {
            return Err(SessionError::SessionNotFound(self.id.clone()));
        }
        Ok(content)
    }

    /// Register a long operation. Fails once the session has been retired.
    pub fn begin_work(self: &Arc<Self>) -> Result<WorkGuard, SessionError> {
        // Increment before checking `retired`; the reclaimer writes in the
        // opposite order, so at least one side sees the other.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = WorkGuard {
            session: Arc::clone(self),
        };
        if self.is_retired() {
            return Err(SessionError::SessionNotFound(self.id.clone()));
        }
        Ok(guard)
    }

    /// Decode an upload outside the lock, then load it
    pub async fn ingest(
        self: &Arc<Self>,
        decoder: Arc<dyn VolumeDecoder>,
        filename: String,
        bytes: Bytes,
    ) -> Result<VolumeSummary, SessionError> {
        let _work = self.begin_work()?;
        let start = Instant::now();

        let name = filename.clone();
        let upload = bytes.clone();
        let handle = tokio::task::spawn_blocking(move || decoder.decode(&name, &upload))
            .await
            .map_err(|e| SessionError::Internal(format!("decode task failed: {}", e)))??;
        histogram!("voxmark_volume_decode_duration_seconds").record(start.elapsed());

        let stored = self.persist(filename.clone(), bytes).await;
        let (summary, stale) = self
            .install_volume(handle, stored.then_some(filename))
            .await?;
        self.discard(stale).await;
        Ok(summary)
    }

    /// Replace the volume. Points, artifact and view are reset, and the
    /// previous upload and exports are deleted from scratch space.
    pub async fn load_volume(&self, handle: VolumeHandle) -> Result<VolumeSummary, SessionError> {
        let (summary, stale) = self.install_volume(handle, None).await?;
        self.discard(stale).await;
        Ok(summary)
    }

    /// Reset content around a new volume, returning scratch files to delete
    async fn install_volume(
        &self,
        handle: VolumeHandle,
        upload_file: Option<String>,
    ) -> Result<(VolumeSummary, Vec<String>), SessionError> {
        let volume = Arc::new(handle);
        let mut content = self.lock_live().await?;

        let dropped_points = content.points.len();
        let mut stale = content.replace_exports(Vec::new());
        stale.extend(content.upload_file.take());
        stale.retain(|name| upload_file.as_ref() != Some(name));

        content.volume = Some(Arc::clone(&volume));
        content.points = PointSet::new();
        content.artifact = None;
        content.view = ViewState::default();
        content.upload_file = upload_file;
        self.touch();

        counter!("voxmark_volumes_loaded_total").increment(1);
        info!(
            "Session {} loaded {} ({:?}), dropped {} points",
            self.id,
            volume.filename(),
            volume.dims().0,
            dropped_points
        );
        Ok((volume.summary(), stale))
    }

    /// Extract a display slice along with its marked points
    pub async fn read_slice(&self, axis: Axis, index: i64) -> Result<SliceView, SessionError> {
        let mut content = self.lock_live().await?;
        let volume = Arc::clone(content.volume()?);
        let image = volume.slice(axis, index)?;

        content.view = ViewState {
            current_axis: axis,
            current_slice: image.index,
        };
        let points = content
            .points
            .on_slice(&volume.mapper(), axis, image.index);
        self.touch();

        Ok(SliceView {
            max_slices: volume.extent(axis),
            image,
            points,
        })
    }

    /// Validate a slice request and hand back the volume for rendering
    /// outside the lock
    pub async fn slice_for_render(
        &self,
        axis: Axis,
        index: i64,
    ) -> Result<(Arc<VolumeHandle>, usize), SessionError> {
        let mut content = self.lock_live().await?;
        let volume = Arc::clone(content.volume()?);
        let index = volume.mapper().check_slice(axis, index)?;

        content.view = ViewState {
            current_axis: axis,
            current_slice: index,
        };
        self.touch();
        Ok((volume, index))
    }

    /// Step the viewing axis and centre the slice on the new axis
    pub async fn change_axis(&self, direction: i32) -> Result<ViewState, SessionError> {
        let mut content = self.lock_live().await?;
        let axis = content.view.current_axis.step(direction);
        let view = ViewState {
            current_axis: axis,
            current_slice: content.volume()?.extent(axis) / 2,
        };
        content.view = view;
        self.touch();
        Ok(view)
    }

    /// Mark a point from slice coordinates.
    ///
    /// Without an explicit number, a point already at the same voxel keeps
    /// its number; otherwise numbering continues from the last marked point.
    pub async fn mark_point(
        &self,
        axis: Axis,
        slice_index: i64,
        pixel: Pixel,
        point_number: Option<i64>,
    ) -> Result<(AnnotationPoint, usize), SessionError> {
        let mut content = self.lock_live().await?;
        let volume = Arc::clone(content.volume()?);
        let voxel = volume.mapper().to_voxel(axis, slice_index, pixel)?;

        let number = match point_number {
            Some(n) => n,
            None => content
                .points
                .number_at(voxel)
                .map(i64::from)
                .unwrap_or_else(|| content.points.next_number()),
        };
        let (point, total) = content.points.upsert(
            volume.dims(),
            number,
            axis,
            voxel.component(axis.index()),
            pixel,
            voxel,
        )?;
        content.invalidate_artifact();
        self.touch();

        info!(
            "Session {}: point {} marked at ({}, {}) -> {:?}",
            self.id, point.point_number, pixel.x, pixel.y, voxel
        );
        Ok((point, total))
    }

    pub async fn remove_point(&self, point_number: i64) -> Result<usize, SessionError> {
        let mut content = self.lock_live().await?;
        let remaining = content.points.remove(point_number)?;
        content.invalidate_artifact();
        self.touch();
        debug!(
            "Session {}: point {} removed, {} remain",
            self.id, point_number, remaining
        );
        Ok(remaining)
    }

    /// Remove every point, returning how many there were
    pub async fn clear_points(&self) -> Result<usize, SessionError> {
        let mut content = self.lock_live().await?;
        let previous = content.points.clear();
        content.invalidate_artifact();
        self.touch();
        Ok(previous)
    }

    pub async fn list_points(&self) -> Result<Vec<AnnotationPoint>, SessionError> {
        let content = self.lock_live().await?;
        self.touch();
        Ok(content.points.list())
    }

    /// Run segmentation against a copy of the current volume and points.
    ///
    /// The lock is held only to take the copy and to install the result; the
    /// engine itself runs unlocked, so other requests for this session keep
    /// being served. The installed artifact records the point revision it was
    /// computed from.
    pub async fn run_segmentation(
        self: &Arc<Self>,
        pipeline: Arc<dyn SegmentationPipeline>,
    ) -> Result<SegmentationReport, SessionError> {
        let _work = self.begin_work()?;

        let (volume, snapshot) = {
            let content = self.lock_live().await?;
            // Points are checked first, so a fresh session reports NoPoints.
            // Points only exist alongside a volume, since loading one clears them.
            if content.points.is_empty() {
                return Err(SessionError::NoPoints);
            }
            let volume = Arc::clone(content.volume()?);
            self.touch();
            (volume, content.points.snapshot())
        };

        info!(
            "Session {}: running {} segmentation with {} points",
            self.id,
            pipeline.name(),
            snapshot.points.len()
        );
        let start = Instant::now();
        let artifact = match self.compute_artifact(pipeline, volume, snapshot).await {
            Ok(artifact) => Arc::new(artifact),
            Err(e) => {
                counter!("voxmark_segmentations_total", "outcome" => "error").increment(1);
                warn!("Session {}: segmentation failed: {}", self.id, e);
                return Err(e);
            }
        };
        histogram!("voxmark_segmentation_duration_seconds").record(start.elapsed());

        let mut exported = Vec::new();
        for file in [&artifact.segmentation, &artifact.labels] {
            if self.persist(file.filename.clone(), file.bytes.clone()).await {
                exported.push(file.filename.clone());
            }
        }

        let mut content = self.lock_live().await?;
        if content.volume.as_ref().map(|v| v.id()) != Some(artifact.volume_id) {
            exported.retain(|name| !content.export_files.contains(name));
            drop(content);
            counter!("voxmark_segmentations_total", "outcome" => "discarded").increment(1);
            info!(
                "Session {}: volume replaced during segmentation, result discarded",
                self.id
            );
            self.discard(exported).await;
            return Err(SessionError::NotReady(
                "volume was replaced while segmentation was running".to_string(),
            ));
        }

        let superseded = content
            .artifact
            .as_ref()
            .is_some_and(|a| a.points_revision > artifact.points_revision);
        let stale = if superseded {
            exported.retain(|name| !content.export_files.contains(name));
            exported
        } else {
            content.artifact = Some(Arc::clone(&artifact));
            content.replace_exports(exported)
        };
        let up_to_date = artifact.points_revision == content.points.revision();
        self.touch();
        drop(content);
        self.discard(stale).await;

        counter!("voxmark_segmentations_total", "outcome" => "success").increment(1);
        info!(
            "Session {}: segmentation produced {} labels using {} (up to date: {})",
            self.id,
            artifact.unique_labels.len(),
            artifact.method,
            up_to_date
        );
        Ok(SegmentationReport {
            artifact: artifact.summary(),
            up_to_date,
            installed: !superseded,
        })
    }

    async fn compute_artifact(
        &self,
        pipeline: Arc<dyn SegmentationPipeline>,
        volume: Arc<VolumeHandle>,
        snapshot: crate::annotation::PointSnapshot,
    ) -> Result<SegmentationArtifact, SessionError> {
        let output = pipeline
            .segment(Arc::clone(&volume), snapshot.points.clone())
            .await?;

        let prefix: String = self.id.chars().take(8).collect();
        let method = pipeline.name();
        let artifact = tokio::task::spawn_blocking(move || {
            SegmentationArtifact::build(&volume, &snapshot, &prefix, method, output, now_millis())
        })
        .await
        .map_err(|e| SessionError::Internal(format!("export task failed: {}", e)))??;
        Ok(artifact)
    }

    /// Fetch an export of the current artifact
    pub async fn download(&self, kind: DownloadKind) -> Result<ExportedFile, SessionError> {
        let content = self.lock_live().await?;
        let artifact = content.artifact.as_ref().ok_or_else(|| {
            SessionError::NotReady("no segmentation available; run segmentation first".to_string())
        })?;
        if !content.artifact_is_current() {
            return Err(SessionError::NotReady(
                "segmentation is out of date with the marked points; run it again".to_string(),
            ));
        }
        let file = artifact.file(kind).clone();
        self.touch();
        Ok(file)
    }

    /// Status projection for the session's own client
    pub async fn snapshot_status(&self) -> Result<SessionStatus, SessionError> {
        let content = self.lock_live().await?;
        self.touch();
        Ok(self.project(&content))
    }

    /// Status projection for operational listings; does not count as activity
    pub async fn peek_status(&self) -> Option<SessionStatus> {
        let content = self.lock_live().await.ok()?;
        Some(self.project(&content))
    }

    fn project(&self, content: &SessionContent) -> SessionStatus {
        let current = content.artifact_is_current();
        SessionStatus {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            file_uploaded: content.volume.is_some(),
            volume: content.volume.as_ref().map(|v| v.summary()),
            total_points: content.points.len(),
            current_axis: content.view.current_axis,
            current_slice: content.view.current_slice,
            segmentation_ready: current,
            segmentation_stale: content.artifact.is_some() && !current,
            busy: self.is_busy(),
        }
    }

    /// Mark the session as removed and release it unless work is in flight.
    /// In that case the last `WorkGuard` to drop releases it.
    pub async fn retire_and_release(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.release().await;
        } else {
            info!(
                "Session {} retired while busy; release deferred",
                self.id
            );
        }
    }

    /// Free content and scratch files. Runs at most once.
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.content.lock().await = SessionContent::default();

        let scratch = Arc::clone(&self.scratch);
        let id = self.id.clone();
        match tokio::task::spawn_blocking(move || scratch.release(&id)).await {
            Ok(Ok(())) => debug!("Released session {}", self.id),
            Ok(Err(e)) => error!("Failed to release scratch for session {}: {}", self.id, e),
            Err(e) => error!("Scratch release task for session {} failed: {}", self.id, e),
        }
    }

    /// Best-effort copy into scratch space; failures are only logged.
    /// Returns whether the file was stored.
    async fn persist(&self, name: String, bytes: Bytes) -> bool {
        let scratch = Arc::clone(&self.scratch);
        let id = self.id.clone();
        match tokio::task::spawn_blocking(move || scratch.persist(&id, &name, &bytes)).await {
            Ok(Ok(path)) => {
                debug!("Session {}: stored {}", self.id, path.display());
                true
            }
            Ok(Err(e)) => {
                warn!("Session {}: could not store scratch file: {}", self.id, e);
                false
            }
            Err(e) => {
                warn!("Session {}: scratch task failed: {}", self.id, e);
                false
            }
        }
    }

    /// Delete scratch files that no longer back any content
    async fn discard(&self, names: Vec<String>) {
        if names.is_empty() {
            return;
        }
        let scratch = Arc::clone(&self.scratch);
        let id = self.id.clone();
        let removal = tokio::task::spawn_blocking(move || {
            names
                .iter()
                .filter_map(|name| scratch.remove(&id, name).err())
                .collect::<Vec<_>>()
        });
        match removal.await {
            Ok(errors) => {
                for e in errors {
                    warn!("Session {}: could not remove scratch file: {}", self.id, e);
                }
            }
            Err(e) => warn!("Session {}: scratch cleanup task failed: {}", self.id, e),
        }
    }
}
