//! Volume module for decoded 3D scans
//!
//! This module provides:
//! - `VolumeHandle`, the immutable decoded volume and its slices
//! - `CoordinateMapper` for slice pixel <-> voxel conversion
//! - `VolumeDecoder` trait with NIfTI-1 and DICOM series implementations
//! - `SliceCache` for caching PNG-encoded slices

mod coords;
mod decoder;
mod dicom;
mod handle;
pub mod nifti;
mod slice_cache;
mod types;

pub use coords::{CoordinateMapper, SlicePosition};
pub use decoder::{DicomDecoder, NiftiDecoder, UploadDecoder, UploadFormat, VolumeDecoder};
pub use handle::{SliceImage, VolumeHandle};
pub use slice_cache::{SliceCache, SliceCacheConfig, SliceKey, encode_png};
pub use types::{
    Affine, Axis, Dims, IDENTITY_AFFINE, Pixel, Voxel, VolumeError, VolumeSummary,
};
