//! Per-session set of numbered reference points

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::palette::{MAX_POINT_NUMBER, Rgb, point_color};
use crate::volume::{Axis, CoordinateMapper, Dims, Pixel, Voxel};

/// Errors raised by point set mutations
#[derive(Debug, Error)]
pub enum PointError {
    #[error("Point number {0} is invalid (must be 1-{MAX_POINT_NUMBER})")]
    InvalidNumber(i64),

    #[error("Point {0} not found")]
    NotFound(i64),

    #[error("Voxel ({}, {}, {}) lies outside volume {:?}", .voxel.x, .voxel.y, .voxel.z, .dims.0)]
    OutOfBounds { voxel: Voxel, dims: Dims },
}

/// A labelled reference point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPoint {
    pub point_number: u8,
    pub axis: Axis,
    pub slice_index: usize,
    pub pixel: Pixel,
    pub voxel: Voxel,
    pub color: Rgb,
}

/// Points keyed by their number.
///
/// `revision` increases on every mutation so a copy of the set taken earlier
/// can be recognised as outdated.
#[derive(Debug, Default)]
pub struct PointSet {
    points: BTreeMap<u8, AnnotationPoint>,
    revision: u64,
    last_marked: u8,
}

/// Frozen copy of a point set
#[derive(Debug, Clone)]
pub struct PointSnapshot {
    pub revision: u64,
    pub points: Vec<AnnotationPoint>,
}

pub fn validate_point_number(point_number: i64) -> Result<u8, PointError> {
    match u8::try_from(point_number) {
        Ok(n) if (1..=MAX_POINT_NUMBER).contains(&n) => Ok(n),
        _ => Err(PointError::InvalidNumber(point_number)),
    }
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the point with this number
    pub fn upsert(
        &mut self,
        dims: Dims,
        point_number: i64,
        axis: Axis,
        slice_index: usize,
        pixel: Pixel,
        voxel: Voxel,
    ) -> Result<(AnnotationPoint, usize), PointError> {
        let point_number = validate_point_number(point_number)?;
        if !dims.contains(voxel) {
            return Err(PointError::OutOfBounds { voxel, dims });
        }
        let color = point_color(point_number).ok_or(PointError::InvalidNumber(point_number.into()))?;

        let point = AnnotationPoint {
            point_number,
            axis,
            slice_index,
            pixel,
            voxel,
            color,
        };
        self.points.insert(point_number, point.clone());
        self.last_marked = point_number;
        self.revision += 1;
        Ok((point, self.points.len()))
    }

    /// Delete a point, returning the remaining count
    pub fn remove(&mut self, point_number: i64) -> Result<usize, PointError> {
        let key = u8::try_from(point_number).map_err(|_| PointError::NotFound(point_number))?;
        self.points
            .remove(&key)
            .ok_or(PointError::NotFound(point_number))?;
        self.revision += 1;
        Ok(self.points.len())
    }

    /// Remove every point, returning how many there were
    pub fn clear(&mut self) -> usize {
        let previous = self.points.len();
        self.points.clear();
        self.last_marked = 0;
        self.revision += 1;
        previous
    }

    pub fn list(&self) -> Vec<AnnotationPoint> {
        self.points.values().cloned().collect()
    }

    /// Points marked on the given slice, ascending by number.
    ///
    /// Overlay pixels are projected back from each point's voxel.
    pub fn on_slice(
        &self,
        mapper: &CoordinateMapper,
        axis: Axis,
        slice_index: usize,
    ) -> Vec<AnnotationPoint> {
        self.points
            .values()
            .filter(|p| p.axis == axis && p.slice_index == slice_index)
            .filter_map(|p| {
                let position = mapper.to_slice(axis, p.voxel).ok()?;
                Some(AnnotationPoint {
                    pixel: position.pixel,
                    ..p.clone()
                })
            })
            .collect()
    }

    pub fn get(&self, point_number: u8) -> Option<&AnnotationPoint> {
        self.points.get(&point_number)
    }

    /// Number of the point already sitting on `voxel`, if any
    pub fn number_at(&self, voxel: Voxel) -> Option<u8> {
        self.points
            .values()
            .find(|p| p.voxel == voxel)
            .map(|p| p.point_number)
    }

    /// Number assigned when the caller does not choose one
    pub fn next_number(&self) -> i64 {
        i64::from(self.last_marked) + 1
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> PointSnapshot {
        PointSnapshot {
            revision: self.revision,
            points: self.list(),
        }
    }
}
