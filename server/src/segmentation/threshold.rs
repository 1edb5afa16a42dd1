//! Built-in region-threshold segmentation engine

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::pipeline::{PipelineError, SegmentationOutput, SegmentationPipeline};
use crate::annotation::AnnotationPoint;
use crate::volume::{Voxel, VolumeHandle};

/// Default half-width of the cube examined around each point
pub const DEFAULT_RADIUS: usize = 12;
/// Default lower bound on the intensity threshold
pub const DEFAULT_MIN_THRESHOLD: f32 = 300.0;
/// Fraction of the centre intensity a voxel must exceed
const CENTRE_FRACTION: f32 = 0.7;

/// Labels voxels near each point whose intensity exceeds a threshold derived
/// from the point's own intensity. The label id is the point number; voxels
/// claimed by a lower-numbered point are never overwritten.
#[derive(Debug, Clone)]
pub struct ThresholdGrowPipeline {
    radius: usize,
    min_threshold: f32,
}

impl ThresholdGrowPipeline {
    pub fn new(radius: usize, min_threshold: f32) -> Self {
        Self {
            radius,
            min_threshold,
        }
    }

    /// Run synchronously on the calling thread
    pub fn segment_blocking(
        &self,
        volume: &VolumeHandle,
        points: &[AnnotationPoint],
    ) -> SegmentationOutput {
        let dims = volume.dims();
        let samples = volume.samples();
        let mut labels = vec![0u8; dims.voxel_count()];
        let mut label_mapping = BTreeMap::new();

        let mut ordered: Vec<&AnnotationPoint> = points.iter().collect();
        ordered.sort_by_key(|p| p.point_number);

        for point in ordered {
            let label = point.point_number;
            label_mapping.insert(point.point_number, label);

            let centre = volume.value(point.voxel);
            let threshold = self.min_threshold.max(centre * CENTRE_FRACTION);
            let range = |dim: usize| {
                let p = point.voxel.component(dim);
                p.saturating_sub(self.radius)..(p + self.radius).min(dims.0[dim])
            };

            let mut claimed = 0usize;
            for z in range(2) {
                for y in range(1) {
                    for x in range(0) {
                        let offset = dims.offset(Voxel::new(x, y, z));
                        if labels[offset] == 0 && samples[offset] > threshold {
                            labels[offset] = label;
                            claimed += 1;
                        }
                    }
                }
            }
            debug!(
                "Point {} at {:?}: threshold {:.2}, {} voxels labelled",
                label, point.voxel, threshold, claimed
            );
        }

        SegmentationOutput {
            labels,
            label_mapping,
        }
    }
}

impl Default for ThresholdGrowPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS, DEFAULT_MIN_THRESHOLD)
    }
}

#[async_trait]
impl SegmentationPipeline for ThresholdGrowPipeline {
    fn name(&self) -> &'static str {
        "threshold"
    }

    async fn segment(
        &self,
        volume: Arc<VolumeHandle>,
        points: Vec<AnnotationPoint>,
    ) -> Result<SegmentationOutput, PipelineError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.segment_blocking(&volume, &points))
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))
    }
}
