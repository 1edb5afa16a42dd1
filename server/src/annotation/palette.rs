//! Fixed point colour palette (one entry per tooth number)

use serde::{Deserialize, Serialize};

/// Highest valid point number
pub const MAX_POINT_NUMBER: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

const fn rgb(r: u8, g: u8, b: u8) -> Rgb {
    Rgb { r, g, b }
}

/// Colour for point `n` lives at index `n - 1`
const PALETTE: [Rgb; MAX_POINT_NUMBER as usize] = [
    rgb(255, 0, 0),
    rgb(0, 255, 0),
    rgb(0, 0, 255),
    rgb(255, 255, 0),
    rgb(0, 255, 255),
    rgb(255, 0, 255),
    rgb(255, 239, 213),
    rgb(255, 170, 0),
    rgb(172, 0, 129),
    rgb(0, 166, 0),
    rgb(169, 102, 205),
    rgb(0, 0, 128),
    rgb(0, 203, 203),
    rgb(94, 117, 29),
    rgb(255, 43, 192),
    rgb(106, 90, 205),
    rgb(221, 166, 169),
    rgb(122, 202, 233),
    rgb(165, 91, 42),
    rgb(150, 185, 100),
    rgb(219, 112, 214),
    rgb(218, 217, 112),
    rgb(215, 64, 235),
    rgb(255, 182, 193),
    rgb(60, 179, 113),
    rgb(182, 158, 255),
    rgb(255, 228, 196),
    rgb(218, 165, 32),
    rgb(0, 128, 128),
    rgb(188, 143, 143),
    rgb(255, 105, 180),
    rgb(255, 218, 185),
];

/// Colour used for labels without a palette entry
pub const FALLBACK_COLOR: Rgb = rgb(255, 255, 255);

/// Palette colour for a point number, if it is in 1..=32
pub fn point_color(point_number: u8) -> Option<Rgb> {
    PALETTE.get(usize::from(point_number).checked_sub(1)?).copied()
}

pub fn label_name(point_number: u8) -> String {
    format!("#{}", point_number)
}

/// One palette row as exposed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub idx: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub label: String,
}

pub fn color_template() -> Vec<PaletteEntry> {
    PALETTE
        .iter()
        .zip(1..=MAX_POINT_NUMBER)
        .map(|(c, idx)| PaletteEntry {
            idx,
            r: c.r,
            g: c.g,
            b: c.b,
            label: label_name(idx),
        })
        .collect()
}
