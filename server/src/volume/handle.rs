//! Immutable decoded volume and slice extraction

use uuid::Uuid;

use super::coords::CoordinateMapper;
use super::types::{Affine, Axis, Dims, Voxel, VolumeError, VolumeSummary};

/// Upper bound of the display range slices are normalized into
const DISPLAY_MAX: f32 = 255.0;

/// A decoded 3D scalar volume.
///
/// Read-only after construction; a new upload produces a new handle with a
/// new `id` rather than mutating this one.
#[derive(Debug)]
pub struct VolumeHandle {
    id: Uuid,
    filename: String,
    file_type: String,
    dims: Dims,
    affine: Affine,
    data: Vec<f32>,
    intensity_range: (f32, f32),
}

/// One 2D plane of a volume, normalized to 0-255
#[derive(Debug, Clone)]
pub struct SliceImage {
    pub axis: Axis,
    pub index: usize,
    /// Number of rows (extent of the lower free dimension)
    pub height: usize,
    /// Number of columns (extent of the higher free dimension)
    pub width: usize,
    /// Row-major display samples
    pub pixels: Vec<u8>,
}

impl SliceImage {
    pub fn rows(&self) -> Vec<Vec<u8>> {
        if self.width == 0 {
            return vec![Vec::new(); self.height];
        }
        self.pixels
            .chunks(self.width)
            .map(|row| row.to_vec())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn at(&self, row: usize, col: usize) -> u8 {
        self.pixels[row * self.width + col]
    }
}

impl VolumeHandle {
    /// Wrap decoded samples. `data` must be laid out first index fastest.
    pub fn new(
        filename: impl Into<String>,
        file_type: impl Into<String>,
        dims: Dims,
        affine: Affine,
        data: Vec<f32>,
    ) -> Result<Self, VolumeError> {
        if dims.0.contains(&0) {
            return Err(VolumeError::Decode(format!(
                "volume has an empty dimension: {:?}",
                dims.0
            )));
        }
        if data.len() != dims.voxel_count() {
            return Err(VolumeError::Decode(format!(
                "expected {} samples for shape {:?}, got {}",
                dims.voxel_count(),
                dims.0,
                data.len()
            )));
        }

        let intensity_range = data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |range: Option<(f32, f32)>, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .unwrap_or((0.0, 0.0));

        Ok(Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            file_type: file_type.into(),
            dims,
            affine,
            data,
            intensity_range,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn intensity_range(&self) -> (f32, f32) {
        self.intensity_range
    }

    pub fn extent(&self, axis: Axis) -> usize {
        self.dims.extent(axis)
    }

    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::new(self.dims)
    }

    pub fn value(&self, voxel: Voxel) -> f32 {
        self.data[self.dims.offset(voxel)]
    }

    pub(crate) fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Map an intensity into the display range using the volume-wide range
    pub fn normalize(&self, value: f32) -> u8 {
        let (lo, hi) = self.intensity_range;
        if hi <= lo || !value.is_finite() {
            return 0;
        }
        ((value - lo) / (hi - lo) * DISPLAY_MAX).clamp(0.0, DISPLAY_MAX) as u8
    }

    /// Extract a slice normalized for display
    pub fn slice(&self, axis: Axis, index: i64) -> Result<SliceImage, VolumeError> {
        let mapper = self.mapper();
        let index = mapper.check_slice(axis, index)?;
        let (height, width) = mapper.slice_shape(axis);
        let (row_dim, col_dim) = axis.free_axes();

        let mut pixels = Vec::with_capacity(height * width);
        let base = Voxel::default().with_component(axis.index(), index);
        for row in 0..height {
            let row_base = base.with_component(row_dim, row);
            for col in 0..width {
                let voxel = row_base.with_component(col_dim, col);
                pixels.push(self.normalize(self.value(voxel)));
            }
        }

        Ok(SliceImage {
            axis,
            index,
            height,
            width,
            pixels,
        })
    }

    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            volume_id: self.id,
            filename: self.filename.clone(),
            shape: self.dims,
            data_range: [self.intensity_range.0, self.intensity_range.1],
            file_type: self.file_type.clone(),
        }
    }
}
