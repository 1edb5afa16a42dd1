//! Mapping between slice pixels and volume voxels
//!
//! A slice along `axis` fixes that array dimension to the slice index. The
//! remaining two dimensions are laid out as rows and columns in ascending
//! dimension order: the pixel row (`y`) indexes the lower free dimension and
//! the pixel column (`x`) the higher one.
//!
//! | axis     | fixed | row (`y`) | column (`x`) |
//! |----------|-------|-----------|--------------|
//! | Sagittal | 0     | 1         | 2            |
//! | Coronal  | 1     | 0         | 2            |
//! | Axial    | 2     | 0         | 1            |

use serde::{Deserialize, Serialize};

use super::types::{Axis, Dims, Pixel, Voxel, VolumeError};

/// Location of a voxel expressed in slice terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicePosition {
    pub axis: Axis,
    pub slice_index: usize,
    pub pixel: Pixel,
}

/// Pure coordinate conversion for a volume of known extents
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    dims: Dims,
}

impl CoordinateMapper {
    pub fn new(dims: Dims) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Slice extent as (rows, columns)
    pub fn slice_shape(&self, axis: Axis) -> (usize, usize) {
        let (row_dim, col_dim) = axis.free_axes();
        (self.dims.0[row_dim], self.dims.0[col_dim])
    }

    /// Validate a slice index against the extent along `axis`
    pub fn check_slice(&self, axis: Axis, slice_index: i64) -> Result<usize, VolumeError> {
        checked_index("slice_index", slice_index, self.dims.extent(axis))
    }

    /// Map a pixel on a slice to the voxel it shows
    pub fn to_voxel(
        &self,
        axis: Axis,
        slice_index: i64,
        pixel: Pixel,
    ) -> Result<Voxel, VolumeError> {
        let slice = self.check_slice(axis, slice_index)?;
        let (rows, cols) = self.slice_shape(axis);
        let row = checked_index("pixel.y", pixel.y, rows)?;
        let col = checked_index("pixel.x", pixel.x, cols)?;

        let (row_dim, col_dim) = axis.free_axes();
        Ok(Voxel::default()
            .with_component(axis.index(), slice)
            .with_component(row_dim, row)
            .with_component(col_dim, col))
    }

    /// Inverse of [`to_voxel`](Self::to_voxel) for a given viewing axis
    pub fn to_slice(&self, axis: Axis, voxel: Voxel) -> Result<SlicePosition, VolumeError> {
        for dim in 0..3 {
            checked_index(
                DIM_FIELDS[dim],
                voxel.component(dim) as i64,
                self.dims.0[dim],
            )?;
        }
        let (row_dim, col_dim) = axis.free_axes();
        Ok(SlicePosition {
            axis,
            slice_index: voxel.component(axis.index()),
            pixel: Pixel::new(
                voxel.component(col_dim) as i64,
                voxel.component(row_dim) as i64,
            ),
        })
    }
}

const DIM_FIELDS: [&str; 3] = ["voxel.x", "voxel.y", "voxel.z"];

fn checked_index(field: &'static str, value: i64, bound: usize) -> Result<usize, VolumeError> {
    if value < 0 || value as u64 >= bound as u64 {
        return Err(VolumeError::OutOfRange {
            field,
            value,
            bound,
        });
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_axial_mapping_matches_layout() {
        let mapper = CoordinateMapper::new(Dims::new(64, 64, 40));
        let voxel = mapper.to_voxel(Axis::Axial, 30, Pixel::new(10, 20)).unwrap();
        assert_eq!(voxel, Voxel::new(20, 10, 30));
    }

    #[test]
    fn test_each_axis_fixes_its_dimension() {
        let mapper = CoordinateMapper::new(Dims::new(8, 9, 10));
        let pixel = Pixel::new(3, 5);

        assert_eq!(
            mapper.to_voxel(Axis::Sagittal, 7, pixel).unwrap(),
            Voxel::new(7, 5, 3)
        );
        assert_eq!(
            mapper.to_voxel(Axis::Coronal, 7, pixel).unwrap(),
            Voxel::new(5, 7, 3)
        );
        assert_eq!(
            mapper.to_voxel(Axis::Axial, 7, pixel).unwrap(),
            Voxel::new(5, 3, 7)
        );
    }

    #[test]
    fn test_slice_index_is_rejected_not_clamped() {
        let mapper = CoordinateMapper::new(Dims::new(64, 64, 40));
        let err = mapper.to_voxel(Axis::Axial, 40, Pixel::new(0, 0)).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::OutOfRange {
                field: "slice_index",
                value: 40,
                bound: 40
            }
        ));
        assert!(mapper.check_slice(Axis::Axial, -1).is_err());
        assert_eq!(mapper.check_slice(Axis::Sagittal, 63).unwrap(), 63);
    }

    #[test]
    fn test_pixel_outside_slice_is_rejected() {
        // Coronal slices of (8, 9, 10) are 8 rows by 10 columns
        let mapper = CoordinateMapper::new(Dims::new(8, 9, 10));
        assert_eq!(mapper.slice_shape(Axis::Coronal), (8, 10));
        assert!(mapper.to_voxel(Axis::Coronal, 0, Pixel::new(9, 7)).is_ok());
        assert!(matches!(
            mapper.to_voxel(Axis::Coronal, 0, Pixel::new(10, 0)),
            Err(VolumeError::OutOfRange {
                field: "pixel.x",
                ..
            })
        ));
        assert!(matches!(
            mapper.to_voxel(Axis::Coronal, 0, Pixel::new(0, 8)),
            Err(VolumeError::OutOfRange {
                field: "pixel.y",
                ..
            })
        ));
        assert!(mapper.to_voxel(Axis::Coronal, 0, Pixel::new(-1, 0)).is_err());
    }

    #[test]
    fn test_inverse_recovers_slice_position() {
        let dims = Dims::new(17, 5, 23);
        let mapper = CoordinateMapper::new(dims);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..500 {
            let axis = Axis::ALL[rng.random_range(0..3)];
            let (rows, cols) = mapper.slice_shape(axis);
            let slice = rng.random_range(0..dims.extent(axis)) as i64;
            let pixel = Pixel::new(
                rng.random_range(0..cols) as i64,
                rng.random_range(0..rows) as i64,
            );

            let voxel = mapper.to_voxel(axis, slice, pixel).unwrap();
            assert!(dims.contains(voxel));
            let back = mapper.to_slice(axis, voxel).unwrap();
            assert_eq!(back.axis, axis);
            assert_eq!(back.slice_index as i64, slice);
            assert_eq!(back.pixel, pixel);
        }
    }

    #[test]
    fn test_mapping_is_a_bijection_on_each_plane() {
        let dims = Dims::new(4, 5, 6);
        let mapper = CoordinateMapper::new(dims);

        for axis in Axis::ALL {
            let (rows, cols) = mapper.slice_shape(axis);
            let mut seen = std::collections::HashSet::new();
            for y in 0..rows as i64 {
                for x in 0..cols as i64 {
                    let voxel = mapper.to_voxel(axis, 2, Pixel::new(x, y)).unwrap();
                    assert_eq!(voxel.component(axis.index()), 2);
                    assert!(seen.insert(voxel), "duplicate voxel {voxel:?}");
                }
            }
            assert_eq!(seen.len(), rows * cols);
        }
    }

    #[test]
    fn test_inverse_rejects_voxel_outside_volume() {
        let mapper = CoordinateMapper::new(Dims::new(4, 4, 4));
        assert!(mapper.to_slice(Axis::Axial, Voxel::new(0, 4, 0)).is_err());
    }
}
