//! Server configuration
//!
//! Configuration is loaded from environment variables; every value has a
//! default suitable for local development.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Session configuration
    pub session: SessionSettings,

    /// Upload configuration
    pub upload: UploadConfig,

    /// Slice rendering configuration
    pub slice: SliceConfig,

    /// Built-in segmentation engine configuration
    pub segmentation: SegmentationConfig,

    /// Static frontend configuration
    pub static_files: StaticFilesConfig,
}

/// Session lifetime configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Inactivity window after which a session is reclaimed
    pub timeout: Duration,
    /// Period of the reclamation pass
    pub reclaim_interval: Duration,
    /// Root directory for per-session scratch files
    pub scratch_dir: PathBuf,
}

/// Upload-related configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
    /// Maximum size of a decompressed volume in bytes
    pub max_decompressed_size: usize,
}

/// Slice rendering configuration
#[derive(Debug, Clone)]
pub struct SliceConfig {
    /// Maximum PNG cache size in bytes
    pub cache_max_size: u64,
}

/// Threshold engine parameters
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Half-width of the cube examined around each point
    pub radius: usize,
    /// Lower bound on the intensity threshold
    pub min_threshold: f32,
}

/// Static file serving configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFilesConfig {
    /// Directory containing the built frontend (optional)
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            session: SessionSettings::default(),
            upload: UploadConfig::default(),
            slice: SliceConfig::default(),
            segmentation: SegmentationConfig::default(),
            static_files: StaticFilesConfig::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            reclaim_interval: Duration::from_secs(60 * 60),
            scratch_dir: env::temp_dir().join("voxmark"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 500 * 1024 * 1024,            // 500 MB
            max_decompressed_size: 2 * 1024 * 1024 * 1024, // 2 GB
        }
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            cache_max_size: 128 * 1024 * 1024, // 128 MB
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            radius: 12,
            min_threshold: 300.0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Session config
        if let Ok(val) = env::var("SESSION_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.session.timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("RECLAIM_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.session.reclaim_interval = Duration::from_secs(secs);
        }
        if let Ok(path) = env::var("SCRATCH_DIR")
            && !path.is_empty()
        {
            config.session.scratch_dir = PathBuf::from(path);
        }

        // Upload config
        if let Ok(val) = env::var("MAX_UPLOAD_SIZE_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.upload.max_upload_size = mb * 1024 * 1024;
        }

        // Slice config
        if let Ok(val) = env::var("SLICE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.slice.cache_max_size = mb * 1024 * 1024;
        }

        // Segmentation config
        if let Ok(val) = env::var("SEGMENTATION_RADIUS")
            && let Ok(radius) = val.parse()
        {
            config.segmentation.radius = radius;
        }
        if let Ok(val) = env::var("SEGMENTATION_MIN_THRESHOLD")
            && let Ok(threshold) = val.parse()
        {
            config.segmentation.min_threshold = threshold;
        }

        // Static files config
        if let Ok(dir) = env::var("STATIC_FILES_DIR")
            && !dir.is_empty()
        {
            config.static_files.dir = Some(PathBuf::from(dir));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.session.timeout, Duration::from_secs(86400));
        assert_eq!(config.session.reclaim_interval, Duration::from_secs(3600));
        assert_eq!(config.upload.max_upload_size, 500 * 1024 * 1024);
        assert_eq!(config.segmentation.radius, 12);
        assert!(config.static_files.dir.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.segmentation.min_threshold, 300.0);
    }
}
