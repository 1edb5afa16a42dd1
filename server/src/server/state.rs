use std::sync::Arc;
use std::time::Instant;

use crate::segmentation::{SegmentationPipeline, ThresholdGrowPipeline};
use crate::session::SessionManager;
use crate::volume::{SliceCache, UploadDecoder, VolumeDecoder};

/// Default upload limit (500 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub decoder: Arc<dyn VolumeDecoder>,
    pub pipeline: Arc<dyn SegmentationPipeline>,
    pub slice_cache: Arc<SliceCache>,
    pub max_upload_bytes: usize,
    pub started_at: Instant,
}

impl AppState {
    /// State with the built-in decoders and segmentation engine
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            decoder: Arc::new(UploadDecoder::default()),
            pipeline: Arc::new(ThresholdGrowPipeline::default()),
            slice_cache: Arc::new(SliceCache::default()),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            started_at: Instant::now(),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn VolumeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Arc<dyn SegmentationPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_slice_cache(mut self, slice_cache: Arc<SliceCache>) -> Self {
        self.slice_cache = slice_cache;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
