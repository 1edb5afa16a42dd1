//! Upload decoding seam

use tracing::{debug, info};

use super::dicom;
use super::handle::VolumeHandle;
use super::nifti;
use super::types::{IDENTITY_AFFINE, VolumeError};

/// Default ceiling on inflated upload content
const DEFAULT_MAX_DECOMPRESSED: usize = 2 * 1024 * 1024 * 1024;

/// Turns uploaded file bytes into a volume.
///
/// Called from the blocking pool; implementations may be CPU-heavy.
pub trait VolumeDecoder: Send + Sync {
    fn decode(&self, filename: &str, bytes: &[u8]) -> Result<VolumeHandle, VolumeError>;
}

/// Upload formats recognised by file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Nifti,
    NiftiGz,
    /// One file of a DICOM series
    DicomFile,
    /// Zip archive holding a DICOM series
    DicomZip,
}

impl UploadFormat {
    pub fn detect(filename: &str) -> Result<Self, VolumeError> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".nii.gz") {
            Ok(Self::NiftiGz)
        } else if lower.ends_with(".nii") {
            Ok(Self::Nifti)
        } else if lower.ends_with(".dcm") {
            Ok(Self::DicomFile)
        } else if lower.ends_with(".zip") {
            Ok(Self::DicomZip)
        } else {
            Err(VolumeError::UnsupportedFormat(format!(
                "{} (expected .nii, .nii.gz, .dcm or a .zip of a DICOM series)",
                filename
            )))
        }
    }

    pub fn is_dicom(self) -> bool {
        matches!(self, Self::DicomFile | Self::DicomZip)
    }
}

fn log_decoded(handle: &VolumeHandle) {
    let (lo, hi) = handle.intensity_range();
    info!(
        "Decoded {}: shape {:?}, range {:.2} to {:.2}",
        handle.filename(),
        handle.dims().0,
        lo,
        hi
    );
}

/// Decoder for NIfTI-1 uploads, plain or gzip-compressed
pub struct NiftiDecoder {
    max_decompressed_bytes: usize,
}

impl NiftiDecoder {
    pub fn new(max_decompressed_bytes: usize) -> Self {
        Self {
            max_decompressed_bytes,
        }
    }
}

impl Default for NiftiDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPRESSED)
    }
}

impl VolumeDecoder for NiftiDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> Result<VolumeHandle, VolumeError> {
        if UploadFormat::detect(filename)?.is_dicom() {
            return Err(VolumeError::UnsupportedFormat(format!(
                "{} (expected .nii or .nii.gz)",
                filename
            )));
        }

        // Trust the bytes over the extension: some tools write .nii.gz uncompressed
        let inflated;
        let raw = if nifti::is_gzip(bytes) {
            inflated = nifti::gunzip(bytes, self.max_decompressed_bytes)?;
            debug!(
                "Inflated {} from {} to {} bytes",
                filename,
                bytes.len(),
                inflated.len()
            );
            inflated.as_slice()
        } else {
            bytes
        };

        let image = nifti::read(raw)?;
        let handle = VolumeHandle::new(filename, "nifti", image.dims, image.affine, image.data)?;
        log_decoded(&handle);
        Ok(handle)
    }
}

/// Decoder for DICOM series, as a single `.dcm` file or a `.zip` of them
pub struct DicomDecoder {
    max_decompressed_bytes: usize,
}

impl DicomDecoder {
    pub fn new(max_decompressed_bytes: usize) -> Self {
        Self {
            max_decompressed_bytes,
        }
    }
}

impl Default for DicomDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPRESSED)
    }
}

impl VolumeDecoder for DicomDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> Result<VolumeHandle, VolumeError> {
        let files = match UploadFormat::detect(filename)? {
            UploadFormat::DicomZip => dicom::unzip_series(bytes, self.max_decompressed_bytes)?,
            UploadFormat::DicomFile => vec![(filename.to_string(), bytes.to_vec())],
            UploadFormat::Nifti | UploadFormat::NiftiGz => {
                return Err(VolumeError::UnsupportedFormat(format!(
                    "{} (expected .dcm or .zip)",
                    filename
                )));
            }
        };

        let series = dicom::stack(files, filename)?;
        // DICOM series carry no NIfTI transform; exports use the identity
        let handle = VolumeHandle::new(filename, "dicom", series.dims, IDENTITY_AFFINE, series.data)?;
        log_decoded(&handle);
        Ok(handle)
    }
}

/// Routes each upload to the decoder for its format
pub struct UploadDecoder {
    nifti: NiftiDecoder,
    dicom: DicomDecoder,
}

impl UploadDecoder {
    pub fn new(max_decompressed_bytes: usize) -> Self {
        Self {
            nifti: NiftiDecoder::new(max_decompressed_bytes),
            dicom: DicomDecoder::new(max_decompressed_bytes),
        }
    }
}

impl Default for UploadDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPRESSED)
    }
}

impl VolumeDecoder for UploadDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> Result<VolumeHandle, VolumeError> {
        if UploadFormat::detect(filename)?.is_dicom() {
            self.dicom.decode(filename, bytes)
        } else {
            self.nifti.decode(filename, bytes)
        }
    }
}
