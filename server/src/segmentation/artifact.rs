//! Segmentation results and their downloadable exports

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use super::pipeline::{PipelineError, SegmentationOutput};
use crate::annotation::{FALLBACK_COLOR, PointSnapshot, label_name, point_color};
use crate::volume::{VolumeHandle, nifti};

/// Which export a client asks to download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Segmentation,
    Labels,
}

impl DownloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadKind::Segmentation => "segmentation",
            DownloadKind::Labels => "labels",
        }
    }
}

impl FromStr for DownloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "segmentation" => Ok(DownloadKind::Segmentation),
            "labels" => Ok(DownloadKind::Labels),
            other => Err(format!(
                "unknown download kind '{}' (expected segmentation or labels)",
                other
            )),
        }
    }
}

/// An encoded file ready to be sent to a client
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

/// Output of one successful segmentation run.
///
/// Tagged with the volume and point revision it was computed from, so the
/// session can tell when later edits have made it stale.
#[derive(Debug)]
pub struct SegmentationArtifact {
    pub volume_id: Uuid,
    pub points_revision: u64,
    pub method: &'static str,
    pub created_at: u64,
    pub label_mapping: BTreeMap<u8, u8>,
    pub unique_labels: Vec<u8>,
    pub segmentation: ExportedFile,
    pub labels: ExportedFile,
}

/// Client-facing description of an artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub method: String,
    pub unique_labels: Vec<u8>,
    pub label_mapping: BTreeMap<u8, u8>,
    pub points_revision: u64,
    pub segmentation_file: String,
    pub labels_file: String,
    pub created_at: u64,
}

impl SegmentationArtifact {
    /// Validate engine output and encode both exports. CPU-bound.
    pub fn build(
        volume: &VolumeHandle,
        snapshot: &PointSnapshot,
        session_prefix: &str,
        method: &'static str,
        output: SegmentationOutput,
        created_at: u64,
    ) -> Result<Self, PipelineError> {
        let expected = volume.dims().voxel_count();
        if output.labels.len() != expected {
            return Err(PipelineError::InvalidOutput(format!(
                "label volume has {} voxels, expected {}",
                output.labels.len(),
                expected
            )));
        }
        if let Some(missing) = snapshot
            .points
            .iter()
            .find(|p| !output.label_mapping.contains_key(&p.point_number))
        {
            return Err(PipelineError::InvalidOutput(format!(
                "label mapping has no entry for point {}",
                missing.point_number
            )));
        }

        let unique_labels: Vec<u8> = output
            .labels
            .iter()
            .copied()
            .filter(|&l| l > 0)
            .collect::<BTreeSet<u8>>()
            .into_iter()
            .collect();

        let stem = format!("segmented_{}_{}", created_at / 1000, session_prefix);
        let encoded = nifti::write_u8_gz(volume.dims(), volume.affine(), &output.labels)
            .map_err(|e| PipelineError::InvalidOutput(e.to_string()))?;

        Ok(Self {
            volume_id: volume.id(),
            points_revision: snapshot.revision,
            method,
            created_at,
            segmentation: ExportedFile {
                filename: format!("{}.nii.gz", stem),
                content_type: "application/octet-stream",
                bytes: Bytes::from(encoded),
            },
            labels: ExportedFile {
                filename: format!("{}_labels.txt", stem),
                content_type: "text/plain",
                bytes: Bytes::from(label_description(&unique_labels)),
            },
            label_mapping: output.label_mapping,
            unique_labels,
        })
    }

    pub fn file(&self, kind: DownloadKind) -> &ExportedFile {
        match kind {
            DownloadKind::Segmentation => &self.segmentation,
            DownloadKind::Labels => &self.labels,
        }
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            method: self.method.to_string(),
            unique_labels: self.unique_labels.clone(),
            label_mapping: self.label_mapping.clone(),
            points_revision: self.points_revision,
            segmentation_file: self.segmentation.filename.clone(),
            labels_file: self.labels.filename.clone(),
            created_at: self.created_at,
        }
    }
}

/// ITK-SNAP label description listing background plus every present label
pub fn label_description(unique_labels: &[u8]) -> String {
    let mut out = String::new();
    out.push_str("################################################\n");
    out.push_str("# ITK-SnAP Label Description File\n");
    out.push_str("# Generated by voxmark\n");
    out.push_str("################################################\n");
    out.push_str("# IDX   -R-  -G-  -B-  -A--  VIS MSH  LABEL\n");
    out.push_str("################################################\n");
    out.push_str("    0     0    0    0        0  0  0    \"Clear Label\"\n");

    for &label in unique_labels {
        let color = point_color(label).unwrap_or(FALLBACK_COLOR);
        let _ = writeln!(
            out,
            "  {:3}  {:3}  {:3}  {:3}        1  1  1    \"{}\"",
            label,
            color.r,
            color.g,
            color.b,
            label_name(label)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::PointSet;
    use crate::volume::{Axis, Dims, IDENTITY_AFFINE, Pixel, Voxel};

    fn volume() -> VolumeHandle {
        let dims = Dims::new(3, 3, 3);
        VolumeHandle::new("v.nii", "nifti", dims, IDENTITY_AFFINE, vec![0.0; 27]).unwrap()
    }

    fn snapshot(numbers: &[i64]) -> PointSnapshot {
        let mut set = PointSet::new();
        for (i, &n) in numbers.iter().enumerate() {
            set.upsert(
                Dims::new(3, 3, 3),
                n,
                Axis::Axial,
                i,
                Pixel::new(0, 0),
                Voxel::new(0, 0, i),
            )
            .unwrap();
        }
        set.snapshot()
    }

    fn output(label_mapping: BTreeMap<u8, u8>) -> SegmentationOutput {
        let mut labels = vec![0u8; 27];
        labels[0] = 1;
        labels[26] = 40;
        SegmentationOutput {
            labels,
            label_mapping,
        }
    }

    #[test]
    fn test_build_names_exports_and_tags_revision() {
        let volume = volume();
        let snap = snapshot(&[1]);
        let artifact = SegmentationArtifact::build(
            &volume,
            &snap,
            "abcdef12",
            "threshold",
            output(BTreeMap::from([(1, 1)])),
            1_700_000_000_123,
        )
        .unwrap();

        assert_eq!(artifact.volume_id, volume.id());
        assert_eq!(artifact.points_revision, snap.revision);
        assert_eq!(artifact.unique_labels, vec![1, 40]);
        assert_eq!(
            artifact.segmentation.filename,
            "segmented_1700000000_abcdef12.nii.gz"
        );
        assert_eq!(
            artifact.file(DownloadKind::Labels).filename,
            "segmented_1700000000_abcdef12_labels.txt"
        );
        assert!(nifti::is_gzip(&artifact.segmentation.bytes));
    }

    #[test]
    fn test_build_rejects_mapping_missing_a_point() {
        let result = SegmentationArtifact::build(
            &volume(),
            &snapshot(&[1, 2]),
            "abcdef12",
            "threshold",
            output(BTreeMap::from([(1, 1)])),
            0,
        );
        assert!(matches!(result, Err(PipelineError::InvalidOutput(_))));
    }

    #[test]
    fn test_build_rejects_wrong_label_count() {
        let result = SegmentationArtifact::build(
            &volume(),
            &snapshot(&[1]),
            "abcdef12",
            "threshold",
            SegmentationOutput {
                labels: vec![0; 5],
                label_mapping: BTreeMap::from([(1, 1)]),
            },
            0,
        );
        assert!(matches!(result, Err(PipelineError::InvalidOutput(_))));
    }

    #[test]
    fn test_label_description_uses_palette_and_fallback() {
        let text = label_description(&[2, 40]);
        assert!(text.starts_with("################################################\n"));
        assert!(text.contains("    0     0    0    0        0  0  0    \"Clear Label\"\n"));
        assert!(text.contains("    2    0  255    0        1  1  1    \"#2\"\n"));
        assert!(text.contains("   40  255  255  255        1  1  1    \"#40\"\n"));
    }

    #[test]
    fn test_download_kind_parses_known_names() {
        assert_eq!(
            "segmentation".parse::<DownloadKind>().unwrap(),
            DownloadKind::Segmentation
        );
        assert_eq!("labels".parse::<DownloadKind>().unwrap(), DownloadKind::Labels);
        assert!("mesh".parse::<DownloadKind>().is_err());
    }
}
