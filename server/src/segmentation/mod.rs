//! Segmentation module
//!
//! This module provides:
//! - `SegmentationPipeline` trait, the boundary to segmentation engines
//! - `ThresholdGrowPipeline`, the built-in engine
//! - `SegmentationArtifact` with NIfTI and ITK-SNAP label exports

mod artifact;
mod pipeline;
mod threshold;

pub use artifact::{
    ArtifactSummary, DownloadKind, ExportedFile, SegmentationArtifact, label_description,
};
pub use pipeline::{PipelineError, SegmentationOutput, SegmentationPipeline};
pub use threshold::{DEFAULT_MIN_THRESHOLD, DEFAULT_RADIUS, ThresholdGrowPipeline};
