//! SegmentationPipeline trait definition

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::annotation::AnnotationPoint;
use crate::volume::VolumeHandle;

/// Errors reported by a segmentation engine
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Segmentation engine failed: {0}")]
    Engine(String),

    #[error("Segmentation output is invalid: {0}")]
    InvalidOutput(String),

    #[error("Segmentation task aborted: {0}")]
    Aborted(String),
}

/// Raw result of a segmentation run
#[derive(Debug, Clone)]
pub struct SegmentationOutput {
    /// One label per voxel, same layout as the source volume
    pub labels: Vec<u8>,
    /// Point number -> label id
    pub label_mapping: BTreeMap<u8, u8>,
}

/// Trait for segmentation engines.
///
/// Receives its own reference to the volume and a copy of the points, so it
/// runs with no session lock held.
#[async_trait]
pub trait SegmentationPipeline: Send + Sync {
    /// Short engine name reported alongside results
    fn name(&self) -> &'static str;

    async fn segment(
        &self,
        volume: Arc<VolumeHandle>,
        points: Vec<AnnotationPoint>,
    ) -> Result<SegmentationOutput, PipelineError>;
}
