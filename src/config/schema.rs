use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::video::format::Resolution;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Video capture settings
    pub video: VideoConfig,
    /// MJPEG delivery settings
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Reject values the capture pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(AppError::Config(format!(
                "jpeg_quality must be within 1-100, got {}",
                self.video.jpeg_quality
            )));
        }
        if self.video.default_fps == 0 {
            return Err(AppError::Config("default_fps must be non-zero".to_string()));
        }
        if self.video.buffer_count == 0 {
            return Err(AppError::Config("buffer_count must be non-zero".to_string()));
        }
        if self.video.relay_join_timeout_ms == 0 {
            return Err(AppError::Config(
                "relay_join_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.stream.frame_interval_ms == 0 {
            return Err(AppError::Config(
                "frame_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.stream.boundary.is_empty()
            || !self.stream.boundary.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::Config(format!(
                "invalid multipart boundary '{}'",
                self.stream.boundary
            )));
        }
        Ok(())
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Page title shown on the index page
    pub title: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8086,
            title: "Webcam Streamer".to_string(),
        }
    }
}

/// Video capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Initial device index (None = pick the device with the largest resolution)
    pub device: Option<u32>,
    /// Frame rate used until the capability probe says otherwise
    pub default_fps: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u32,
    /// Emit optimized Huffman tables
    pub jpeg_optimize: bool,
    /// Number of driver capture buffers
    pub buffer_count: u32,
    /// Frame rates tried by the capability probe, highest first
    pub fps_candidates: Vec<u32>,
    /// Echoed rates at or below this are ignored by the probe
    pub fps_floor: u32,
    /// Pause between releasing a device and opening the next one
    pub settle_delay_ms: u64,
    /// Poll timeout for a single frame read
    pub read_timeout_ms: u64,
    /// How long a device switch waits for the relay task to exit
    pub relay_join_timeout_ms: u64,
    /// Only list even /dev/videoN nodes. Many UVC drivers expose a metadata
    /// node right after each capture node, but this is platform specific.
    pub even_index_only: bool,
    /// Resolutions reported when a device cannot be queried
    pub fallback_resolutions: Vec<Resolution>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: None,
            default_fps: 30,
            jpeg_quality: 85,
            jpeg_optimize: true,
            buffer_count: 1,
            fps_candidates: vec![60, 45, 36, 30, 25, 20, 15],
            fps_floor: 15,
            settle_delay_ms: 500,
            read_timeout_ms: 2000,
            relay_join_timeout_ms: 2000,
            even_index_only: true,
            fallback_resolutions: vec![Resolution::HD720, Resolution::VGA],
        }
    }
}

impl VideoConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn relay_join_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_join_timeout_ms)
    }
}

/// MJPEG delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-client delivery interval
    pub frame_interval_ms: u64,
    /// Multipart boundary token
    pub boundary: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            boundary: "frame".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
