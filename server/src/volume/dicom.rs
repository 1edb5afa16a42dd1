//! DICOM series reader
//!
//! A series arrives either as one `.dcm` file or as a `.zip` archive of
//! `.dcm` files. Each file contributes one slice per frame; slices are
//! ordered by instance number, then slice location, and stacked along the
//! first array dimension so the volume shape is `(slices, rows, columns)`.

use std::io::{Cursor, Read};

use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use dicom_pixeldata::PixelDecoder;
use tracing::{debug, warn};

use super::types::{Dims, Voxel, VolumeError};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// One decoded 2D slice with the attributes used to order it
#[derive(Debug, Clone)]
pub struct DicomSlice {
    pub instance_number: i64,
    pub slice_location: f64,
    pub rows: usize,
    pub columns: usize,
    /// Row-major samples
    pub samples: Vec<f32>,
}

/// Stacked series ready to wrap in a volume handle
#[derive(Debug)]
pub struct DicomSeries {
    pub dims: Dims,
    pub data: Vec<f32>,
}

fn strip_preamble(bytes: &[u8]) -> Result<&[u8], VolumeError> {
    if bytes.len() >= PREAMBLE_LEN + MAGIC.len()
        && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] == MAGIC
    {
        Ok(&bytes[PREAMBLE_LEN..])
    } else if bytes.starts_with(MAGIC) {
        Ok(bytes)
    } else {
        Err(VolumeError::Decode("missing DICM magic".to_string()))
    }
}

fn int_attribute(object: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<i64> {
    object.element(tag).ok()?.to_int::<i64>().ok()
}

fn float_attribute(object: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

/// Decode every frame of one DICOM file into slices
pub fn read_file(bytes: &[u8]) -> Result<Vec<DicomSlice>, VolumeError> {
    let object = dicom_object::from_reader(strip_preamble(bytes)?)
        .map_err(|e| VolumeError::Decode(format!("dicom: {}", e)))?;
    let pixels = object
        .decode_pixel_data()
        .map_err(|e| VolumeError::Decode(format!("dicom pixel data: {}", e)))?;

    if pixels.samples_per_pixel() != 1 {
        return Err(VolumeError::Decode(format!(
            "expected grayscale pixel data, got {} samples per pixel",
            pixels.samples_per_pixel()
        )));
    }
    let rows = pixels.rows() as usize;
    let columns = pixels.columns() as usize;
    let frames = pixels.number_of_frames().max(1) as usize;
    let samples: Vec<f32> = pixels
        .to_vec()
        .map_err(|e| VolumeError::Decode(format!("dicom pixel data: {}", e)))?;

    let frame_len = rows * columns;
    if frame_len == 0 || samples.len() != frame_len * frames {
        return Err(VolumeError::Decode(format!(
            "expected {} frames of {}x{} samples, got {}",
            frames,
            rows,
            columns,
            samples.len()
        )));
    }

    let instance_number = int_attribute(&object, tags::INSTANCE_NUMBER).unwrap_or(0);
    let slice_location = float_attribute(&object, tags::SLICE_LOCATION).unwrap_or(0.0);
    Ok(samples
        .chunks(frame_len)
        .map(|frame| DicomSlice {
            instance_number,
            slice_location,
            rows,
            columns,
            samples: frame.to_vec(),
        })
        .collect())
}

/// Extract the `.dcm` members of a zip archive, at most `limit` bytes in total
pub fn unzip_series(bytes: &[u8], limit: usize) -> Result<Vec<(String, Vec<u8>)>, VolumeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| VolumeError::Decode(format!("zip: {}", e)))?;

    let mut members = Vec::new();
    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| VolumeError::Decode(format!("zip: {}", e)))?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".dcm") {
            continue;
        }
        let name = entry.name().to_string();

        let remaining = (limit as u64).saturating_sub(total);
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(remaining + 1)
            .read_to_end(&mut data)
            .map_err(|e| VolumeError::Decode(format!("zip member {}: {}", name, e)))?;
        total += data.len() as u64;
        if total > limit as u64 {
            return Err(VolumeError::Decode(format!(
                "decompressed series exceeds {} bytes",
                limit
            )));
        }
        members.push((name, data));
    }
    debug!("Extracted {} DICOM files ({} bytes)", members.len(), total);
    Ok(members)
}

/// Order slices and stack them into one volume.
///
/// Files that fail to decode are skipped; a series with no decodable slice
/// is an error.
pub fn stack(files: Vec<(String, Vec<u8>)>, source: &str) -> Result<DicomSeries, VolumeError> {
    if files.is_empty() {
        return Err(VolumeError::EmptySeries(source.to_string()));
    }

    let mut slices = Vec::new();
    for (name, bytes) in &files {
        match read_file(bytes) {
            Ok(decoded) => slices.extend(decoded),
            Err(e) => warn!("Skipping invalid DICOM file {}: {}", name, e),
        }
    }
    if slices.is_empty() {
        return Err(VolumeError::Decode(format!(
            "no valid DICOM slices in {}",
            source
        )));
    }

    // Stable, so frames of a multi-frame file keep their order
    slices.sort_by(|a, b| {
        a.instance_number
            .cmp(&b.instance_number)
            .then(a.slice_location.total_cmp(&b.slice_location))
    });

    let (rows, columns) = (slices[0].rows, slices[0].columns);
    if let Some(odd) = slices
        .iter()
        .find(|s| s.rows != rows || s.columns != columns)
    {
        return Err(VolumeError::Decode(format!(
            "slice size {}x{} does not match {}x{}",
            odd.rows, odd.columns, rows, columns
        )));
    }

    // Slice index is the first (fastest) dimension
    let dims = Dims::new(slices.len(), rows, columns);
    let mut data = vec![0.0; dims.voxel_count()];
    for (i, slice) in slices.iter().enumerate() {
        for (j, &value) in slice.samples.iter().enumerate() {
            data[dims.offset(Voxel::new(i, j / columns, j % columns))] = value;
        }
    }
    Ok(DicomSeries { dims, data })
}
