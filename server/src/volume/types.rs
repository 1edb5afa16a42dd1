//! Volume geometry types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with volumes
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("{field} {value} is out of range (valid: 0..{bound})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        bound: usize,
    },

    #[error("Unsupported upload format: {0}")]
    UnsupportedFormat(String),

    #[error("No DICOM files found in {0}")]
    EmptySeries(String),

    #[error("Failed to decode volume: {0}")]
    Decode(String),

    #[error("Failed to encode slice: {0}")]
    Encode(String),
}

/// One of the three canonical viewing planes.
///
/// The discriminant is the index of the array dimension held fixed by the
/// plane, and the declaration order is the navigation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum Axis {
    Sagittal = 0,
    Coronal = 1,
    Axial = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Sagittal, Axis::Coronal, Axis::Axial];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Step through the Sagittal -> Coronal -> Axial cycle.
    /// Any positive direction moves forward one plane, any negative one back.
    pub fn step(self, direction: i32) -> Axis {
        let next = (self.index() as i32 + direction.signum()).rem_euclid(3);
        Axis::ALL[next as usize]
    }

    /// Array dimensions that vary across a slice of this axis, as
    /// (row dimension, column dimension).
    pub fn free_axes(self) -> (usize, usize) {
        match self {
            Axis::Sagittal => (1, 2),
            Axis::Coronal => (0, 2),
            Axis::Axial => (0, 1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Sagittal => "sagittal",
            Axis::Coronal => "coronal",
            Axis::Axial => "axial",
        }
    }
}

impl TryFrom<i64> for Axis {
    type Error = VolumeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Axis::Sagittal),
            1 => Ok(Axis::Coronal),
            2 => Ok(Axis::Axial),
            _ => Err(VolumeError::OutOfRange {
                field: "axis",
                value,
                bound: 3,
            }),
        }
    }
}

impl From<Axis> for u8 {
    fn from(axis: Axis) -> Self {
        axis as u8
    }
}

/// Volume extents `[nx, ny, nz]` in array order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims(pub [usize; 3]);

impl Dims {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self([nx, ny, nz])
    }

    pub fn extent(&self, axis: Axis) -> usize {
        self.0[axis.index()]
    }

    pub fn voxel_count(&self) -> usize {
        self.0.iter().product()
    }

    pub fn contains(&self, voxel: Voxel) -> bool {
        voxel.x < self.0[0] && voxel.y < self.0[1] && voxel.z < self.0[2]
    }

    /// Linear offset of a voxel in the stored buffer (first index fastest,
    /// the NIfTI on-disk order).
    pub fn offset(&self, voxel: Voxel) -> usize {
        voxel.x + self.0[0] * (voxel.y + self.0[1] * voxel.z)
    }
}

/// Integer grid coordinate into a volume. `x`, `y`, `z` index the first,
/// second and third array dimension respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Voxel {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn component(&self, dim: usize) -> usize {
        match dim {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    fn component_mut(&mut self, dim: usize) -> &mut usize {
        match dim {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }

    pub(crate) fn with_component(mut self, dim: usize, value: usize) -> Self {
        *self.component_mut(dim) = value;
        self
    }
}

/// 2D interaction coordinate on a slice: `x` is the column, `y` the row.
/// Signed because it arrives straight from client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: i64,
    pub y: i64,
}

impl Pixel {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Row-major 4x4 voxel-to-world transform
pub type Affine = [[f64; 4]; 4];

pub const IDENTITY_AFFINE: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Summary of a loaded volume, returned from uploads and status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub volume_id: uuid::Uuid,
    pub filename: String,
    pub shape: Dims,
    pub data_range: [f32; 2],
    pub file_type: String,
}
