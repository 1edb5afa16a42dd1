//! PNG rendering and LRU cache for display slices
//!
//! Rendered slices are keyed by the volume's id rather than the session id.
//! A re-upload mints a new id, so a cached render can never outlive the
//! volume it was drawn from; old entries simply age out.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use metrics::counter;
use moka::future::Cache;
use uuid::Uuid;

use super::handle::{SliceImage, VolumeHandle};
use super::types::{Axis, VolumeError};

/// Key for slice cache entries
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SliceKey {
    pub volume_id: Uuid,
    pub axis: Axis,
    pub index: usize,
}

/// Configuration for the slice cache
#[derive(Debug, Clone)]
pub struct SliceCacheConfig {
    /// Maximum cache size in bytes (default: 128MB)
    pub max_size_bytes: u64,
    /// Evict entries not accessed for this duration (default: 10 min)
    pub tti: Duration,
}

impl Default for SliceCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 128 * 1024 * 1024,
            tti: Duration::from_secs(600),
        }
    }
}

/// Encode a slice as 8-bit grayscale PNG
pub fn encode_png(slice: &SliceImage) -> Result<Bytes, VolumeError> {
    let mut buf = Cursor::new(Vec::with_capacity(slice.pixels.len() / 2));
    PngEncoder::new(&mut buf)
        .write_image(
            &slice.pixels,
            slice.width as u32,
            slice.height as u32,
            ExtendedColorType::L8,
        )
        .map_err(|e| VolumeError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf.into_inner()))
}

/// Size-bounded cache of encoded slice PNGs
pub struct SliceCache {
    cache: Cache<SliceKey, Bytes>,
}

impl SliceCache {
    pub fn new(config: SliceCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &SliceKey, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_size_bytes)
            .time_to_idle(config.tti)
            .build();
        Self { cache }
    }

    /// Return the PNG for a slice, rendering it on a miss.
    /// `index` must already be validated against the volume.
    pub async fn get_or_render(
        &self,
        volume: &VolumeHandle,
        axis: Axis,
        index: usize,
    ) -> Result<Bytes, VolumeError> {
        let key = SliceKey {
            volume_id: volume.id(),
            axis,
            index,
        };
        if let Some(png) = self.cache.get(&key).await {
            counter!("voxmark_slice_cache_hits_total").increment(1);
            return Ok(png);
        }
        counter!("voxmark_slice_cache_misses_total").increment(1);

        let slice = volume.slice(axis, index as i64)?;
        let png = encode_png(&slice)?;
        self.cache.insert(key, png.clone()).await;
        Ok(png)
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush pending maintenance so `entry_count` is accurate
    #[cfg(test)]
    pub(crate) async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::new(SliceCacheConfig::default())
    }
}
