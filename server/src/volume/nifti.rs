//! NIfTI-1 single-file reader and uint8 label writer
//!
//! Only the parts of the format needed here are handled: the 348-byte
//! header, either byte order, scalar datatypes, intensity scaling and the
//! sform / qform / pixdim spatial transforms.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::types::{Affine, Dims, IDENTITY_AFFINE, VolumeError};

const HEADER_SIZE: usize = 348;
/// Header plus the 4-byte extension flag
const DATA_OFFSET: usize = 352;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

/// Decoded image content
#[derive(Debug)]
pub struct NiftiImage {
    pub dims: Dims,
    pub affine: Affine,
    pub data: Vec<f32>,
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Inflate `.nii.gz` content, refusing to produce more than `limit` bytes
pub fn gunzip(bytes: &[u8], limit: usize) -> Result<Vec<u8>, VolumeError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| VolumeError::Decode(format!("gzip: {}", e)))?;
    if out.len() > limit {
        return Err(VolumeError::Decode(format!(
            "decompressed volume exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Byte-order aware view over the header
struct Header<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl<'a> Header<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, VolumeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VolumeError::Decode(format!(
                "file is {} bytes, shorter than a NIfTI-1 header",
                bytes.len()
            )));
        }
        let raw: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let little_endian = if i32::from_le_bytes(raw) == HEADER_SIZE as i32 {
            true
        } else if i32::from_be_bytes(raw) == HEADER_SIZE as i32 {
            false
        } else {
            return Err(VolumeError::Decode("not a NIfTI-1 header".to_string()));
        };

        match &bytes[344..348] {
            b"n+1\0" => Ok(Self {
                bytes,
                little_endian,
            }),
            b"ni1\0" => Err(VolumeError::Decode(
                "header/image pair files (.hdr/.img) are not supported".to_string(),
            )),
            _ => Err(VolumeError::Decode("missing NIfTI-1 magic".to_string())),
        }
    }

    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        out
    }

    fn i16(&self, offset: usize) -> i16 {
        let raw = self.array::<2>(offset);
        if self.little_endian {
            i16::from_le_bytes(raw)
        } else {
            i16::from_be_bytes(raw)
        }
    }

    fn f32(&self, offset: usize) -> f32 {
        let raw = self.array::<4>(offset);
        if self.little_endian {
            f32::from_le_bytes(raw)
        } else {
            f32::from_be_bytes(raw)
        }
    }

    fn f32s<const N: usize>(&self, offset: usize) -> [f32; N] {
        std::array::from_fn(|i| self.f32(offset + 4 * i))
    }

    fn affine(&self) -> Affine {
        let pixdim: [f32; 8] = self.f32s(76);
        let qform_code = self.i16(252);
        let sform_code = self.i16(254);

        if sform_code > 0 {
            let mut affine = IDENTITY_AFFINE;
            for (row, offset) in [280, 296, 312].into_iter().enumerate() {
                let srow: [f32; 4] = self.f32s(offset);
                affine[row] = srow.map(f64::from);
            }
            return affine;
        }

        if qform_code > 0 {
            let [b, c, d] = self.f32s::<3>(256).map(f64::from);
            let offsets: [f32; 3] = self.f32s(268);
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let scale = [
                f64::from(pixdim[1]),
                f64::from(pixdim[2]),
                f64::from(pixdim[3]) * qfac,
            ];
            let rotation = [
                [
                    a * a + b * b - c * c - d * d,
                    2.0 * (b * c - a * d),
                    2.0 * (b * d + a * c),
                ],
                [
                    2.0 * (b * c + a * d),
                    a * a + c * c - b * b - d * d,
                    2.0 * (c * d - a * b),
                ],
                [
                    2.0 * (b * d - a * c),
                    2.0 * (c * d + a * b),
                    a * a + d * d - c * c - b * b,
                ],
            ];
            let mut affine = IDENTITY_AFFINE;
            for row in 0..3 {
                for col in 0..3 {
                    affine[row][col] = rotation[row][col] * scale[col];
                }
                affine[row][3] = f64::from(offsets[row]);
            }
            return affine;
        }

        let mut affine = IDENTITY_AFFINE;
        for axis in 0..3 {
            let spacing = f64::from(pixdim[axis + 1]);
            affine[axis][axis] = if spacing > 0.0 { spacing } else { 1.0 };
        }
        affine
    }
}

/// Decode an uncompressed NIfTI-1 single-file image
pub fn read(bytes: &[u8]) -> Result<NiftiImage, VolumeError> {
    let header = Header::parse(bytes)?;

    let dim: [i16; 8] = std::array::from_fn(|i| header.i16(40 + 2 * i));
    let ndim = dim[0];
    let extra_dims_are_singleton = dim[4..(ndim.clamp(3, 7) as usize + 1)]
        .iter()
        .all(|&d| d <= 1);
    if !(3..=7).contains(&ndim) || !extra_dims_are_singleton {
        return Err(VolumeError::Decode(format!(
            "expected a 3D volume, header declares dim={:?}",
            &dim[..(ndim.clamp(0, 7) as usize + 1)]
        )));
    }
    if dim[1..4].iter().any(|&d| d <= 0) {
        return Err(VolumeError::Decode(format!(
            "invalid volume shape {:?}",
            &dim[1..4]
        )));
    }
    let dims = Dims::new(dim[1] as usize, dim[2] as usize, dim[3] as usize);

    let datatype = header.i16(70);
    let width = match datatype {
        DT_UINT8 | DT_INT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => {
            return Err(VolumeError::Decode(format!(
                "unsupported NIfTI datatype code {}",
                other
            )));
        }
    };

    let vox_offset = header.f32(108);
    let start = if vox_offset >= DATA_OFFSET as f32 {
        vox_offset as usize
    } else {
        DATA_OFFSET
    };
    let count = dims.voxel_count();
    let end = count
        .checked_mul(width)
        .and_then(|len| len.checked_add(start))
        .ok_or_else(|| VolumeError::Decode("volume size overflows".to_string()))?;
    if bytes.len() < end {
        return Err(VolumeError::Decode(format!(
            "truncated image data: need {} bytes, file has {}",
            end,
            bytes.len()
        )));
    }

    let raw = &bytes[start..end];
    let le = header.little_endian;
    let data: Vec<f32> = raw
        .chunks_exact(width)
        .map(|c| sample(datatype, c, le))
        .collect();

    let slope = header.f32(112);
    let inter = header.f32(116);
    let data = if slope != 0.0 && slope.is_finite() && (slope != 1.0 || inter != 0.0) {
        data.into_iter().map(|v| v * slope + inter).collect()
    } else {
        data
    };

    Ok(NiftiImage {
        dims,
        affine: header.affine(),
        data,
    })
}

fn sample(datatype: i16, c: &[u8], le: bool) -> f32 {
    macro_rules! num {
        ($t:ty, $n:literal) => {{
            let mut raw = [0u8; $n];
            raw.copy_from_slice(c);
            if le {
                <$t>::from_le_bytes(raw)
            } else {
                <$t>::from_be_bytes(raw)
            }
        }};
    }
    match datatype {
        DT_UINT8 => f32::from(c[0]),
        DT_INT8 => f32::from(c[0] as i8),
        DT_INT16 => f32::from(num!(i16, 2)),
        DT_UINT16 => f32::from(num!(u16, 2)),
        DT_INT32 => num!(i32, 4) as f32,
        DT_UINT32 => num!(u32, 4) as f32,
        DT_FLOAT32 => num!(f32, 4),
        _ => num!(f64, 8) as f32,
    }
}

/// Encode a uint8 volume as a gzip-compressed NIfTI-1 file.
/// `data` is laid out first index fastest.
pub fn write_u8_gz(dims: Dims, affine: &Affine, data: &[u8]) -> Result<Vec<u8>, VolumeError> {
    if data.len() != dims.voxel_count() {
        return Err(VolumeError::Encode(format!(
            "expected {} labels, got {}",
            dims.voxel_count(),
            data.len()
        )));
    }
    let header = u8_header(dims, affine)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&header)
        .and_then(|_| encoder.write_all(data))
        .map_err(|e| VolumeError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| VolumeError::Encode(e.to_string()))
}

fn u8_header(dims: Dims, affine: &Affine) -> Result<Vec<u8>, VolumeError> {
    let mut header = vec![0u8; DATA_OFFSET];
    let mut put = |offset: usize, bytes: &[u8]| {
        header[offset..offset + bytes.len()].copy_from_slice(bytes);
    };

    put(0, &(HEADER_SIZE as i32).to_le_bytes());
    put(38, b"r");
    let mut dim = [1i16; 8];
    dim[0] = 3;
    for (i, &extent) in dims.0.iter().enumerate() {
        dim[i + 1] = i16::try_from(extent).map_err(|_| {
            VolumeError::Encode(format!("dimension {} does not fit a NIfTI header", extent))
        })?;
    }
    for (i, d) in dim.iter().enumerate() {
        put(40 + 2 * i, &d.to_le_bytes());
    }
    put(70, &DT_UINT8.to_le_bytes());
    put(72, &8i16.to_le_bytes());

    let mut pixdim = [1.0f32; 8];
    for col in 0..3 {
        let norm = (0..3).map(|row| affine[row][col].powi(2)).sum::<f64>().sqrt();
        pixdim[col + 1] = if norm > 0.0 { norm as f32 } else { 1.0 };
    }
    for (i, p) in pixdim.iter().enumerate() {
        put(76 + 4 * i, &p.to_le_bytes());
    }
    put(108, &(DATA_OFFSET as f32).to_le_bytes());
    put(112, &1.0f32.to_le_bytes());
    // millimetres
    put(123, &[2]);
    put(148, b"voxmark segmentation");
    put(254, &1i16.to_le_bytes());
    for (row, offset) in [280, 296, 312].into_iter().enumerate() {
        for col in 0..4 {
            put(offset + 4 * col, &(affine[row][col] as f32).to_le_bytes());
        }
    }
    put(344, b"n+1\0");
    Ok(header)
}
