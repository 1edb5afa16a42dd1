//! Annotation module for numbered reference points
//!
//! Points are keyed by number (1-32), each carrying a fixed palette colour.

mod palette;
mod points;

pub use palette::{
    FALLBACK_COLOR, MAX_POINT_NUMBER, PaletteEntry, Rgb, color_template, label_name, point_color,
};
pub use points::{AnnotationPoint, PointError, PointSet, PointSnapshot, validate_point_number};
