//! Device handle: one open capture device and its negotiated mode

use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{BackendOpener, CaptureBackend};
use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::config::VideoConfig;
use crate::error::{AppError, Result};

/// Exclusive owner of one open capture device
///
/// Every mode change is read back from the device after it is requested,
/// since drivers silently clamp or ignore values they do not support.
pub struct DeviceHandle {
    id: u32,
    backend: Option<Box<dyn CaptureBackend>>,
    resolution: Resolution,
    format: PixelFormat,
    target_fps: u32,
    max_fps: u32,
}

impl DeviceHandle {
    /// Open device `id`, probe its frame rate and apply the first (largest)
    /// entry of `resolutions`.
    ///
    /// Blocking: performs several ioctls and one discard read.
    pub fn open(
        opener: &dyn BackendOpener,
        id: u32,
        resolutions: &[Resolution],
        config: &VideoConfig,
    ) -> Result<Self> {
        let mut backend = opener.open(id).map_err(|e| AppError::DeviceUnavailable {
            device: id,
            reason: e.to_string(),
        })?;

        let resolution = backend.current_resolution().unwrap_or(Resolution::VGA);
        let format = backend.format();
        let mut handle = Self {
            id,
            backend: Some(backend),
            resolution,
            format,
            target_fps: config.default_fps,
            max_fps: config.default_fps,
        };

        handle.probe_frame_rate(&config.fps_candidates, config.fps_floor);

        if let Some(&best) = resolutions.first() {
            handle.configure(best.width, best.height)?;
        }
        handle.apply_frame_rate();

        info!(
            "Camera {}: {} {} @ {}fps",
            handle.id, handle.resolution, handle.format, handle.target_fps
        );
        Ok(handle)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn max_fps(&self) -> u32 {
        self.max_fps
    }

    /// Nominal time between two frames at the target rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn CaptureBackend>> {
        let id = self.id;
        self.backend.as_mut().ok_or(AppError::DeviceUnavailable {
            device: id,
            reason: "device is closed".to_string(),
        })
    }

    /// Try each candidate rate and adopt the highest one the device echoes
    /// back above `floor`. Candidates the device rejects are skipped; if it
    /// rejects all of them the current rate is kept.
    pub fn probe_frame_rate(&mut self, candidates: &[u32], floor: u32) -> u32 {
        let Some(backend) = self.backend.as_mut() else {
            return self.target_fps;
        };

        let mut best = floor;
        let mut acknowledged = false;
        for &fps in candidates {
            match backend.request_frame_rate(fps) {
                Ok(actual) => {
                    debug!("Camera {}: requested {}fps, got {}fps", self.id, fps, actual);
                    acknowledged = true;
                    if actual > best {
                        best = actual;
                    }
                }
                Err(e) => debug!("Camera {}: {}fps rejected: {}", self.id, fps, e),
            }
        }

        if acknowledged {
            self.max_fps = best;
            self.target_fps = best;
        } else {
            warn!(
                "Camera {} ignored all frame rate requests, keeping {}fps",
                self.id, self.target_fps
            );
        }
        self.target_fps
    }

    /// Request a resolution and return the one actually in effect.
    ///
    /// One frame is read and dropped after the request so the new mode can
    /// settle before it is read back.
    pub fn configure(&mut self, width: u32, height: u32) -> Result<Resolution> {
        let id = self.id;
        let target_fps = self.target_fps;
        let backend = self.backend_mut()?;

        if let Err(e) = backend.request_resolution(Resolution::new(width, height)) {
            warn!("Camera {}: resolution {}x{} rejected: {}", id, width, height, e);
        }
        if let Err(e) = backend.request_frame_rate(target_fps) {
            debug!("Camera {}: frame rate request failed: {}", id, e);
        }

        // Discard read
        if let Err(e) = backend.grab() {
            debug!("Camera {}: discard read failed: {}", id, e);
        }

        let actual = backend
            .current_resolution()
            .map_err(|e| AppError::DeviceUnavailable {
                device: id,
                reason: format!("failed to read back resolution: {}", e),
            })?;
        let format = backend.format();

        self.format = format;
        if actual.width != width || actual.height != height {
            warn!("Camera {}: requested {}x{}, got {}", id, width, height, actual);
        }
        self.resolution = actual;
        Ok(actual)
    }

    /// Request the target rate again and adopt whatever the device echoes.
    fn apply_frame_rate(&mut self) {
        let id = self.id;
        let target = self.target_fps;
        let Ok(backend) = self.backend_mut() else {
            return;
        };

        match backend.request_frame_rate(target) {
            Ok(actual) if actual > 0 && actual != target => {
                warn!("Camera {}: requested {}fps, running at {}fps", id, target, actual);
                self.target_fps = actual;
            }
            Ok(_) => {}
            Err(e) => debug!("Camera {}: frame rate request failed: {}", id, e),
        }
    }

    /// Blocking read of one frame.
    ///
    /// `Ok(None)` signals a transient miss the caller should simply retry.
    pub fn read_frame(&mut self) -> Result<Option<VideoFrame>> {
        let id = self.id;
        let resolution = self.resolution;
        let backend = self.backend_mut()?;

        match backend.grab() {
            Ok(Some(data)) => Ok(Some(VideoFrame::new(
                data,
                resolution,
                backend.format(),
                id,
            ))),
            Ok(None) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(AppError::ReadTimeout),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the device. Safe to call on an already released handle.
    pub fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
            info!("Released camera {}", self.id);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::FakeOpener;

    fn config() -> VideoConfig {
        VideoConfig::default()
    }

    #[test]
    fn test_probe_adopts_highest_acknowledged_rate() {
        let opener = FakeOpener::new().with_max_fps(30);
        let handle = DeviceHandle::open(&opener, 0, &[], &config()).unwrap();
        assert_eq!(handle.max_fps(), 30);
        assert_eq!(handle.target_fps(), 30);
    }

    #[test]
    fn test_probe_ignores_rates_below_floor() {
        let opener = FakeOpener::new().with_max_fps(10);
        let handle = DeviceHandle::open(&opener, 0, &[], &config()).unwrap();
        assert_eq!(handle.max_fps(), 15);
    }

    #[test]
    fn test_probe_keeps_rate_when_device_rejects_everything() {
        let opener = FakeOpener::new().rejecting_frame_rates();
        let handle = DeviceHandle::open(&opener, 0, &[], &config()).unwrap();
        assert_eq!(handle.target_fps(), 30);
    }

    #[test]
    fn test_configure_reads_back_clamped_resolution() {
        let opener = FakeOpener::new().with_resolution_limit(Resolution::HD720);
        let mut handle =
            DeviceHandle::open(&opener, 0, &[Resolution::HD1080], &config()).unwrap();
        assert_eq!(handle.resolution(), Resolution::HD720);

        let actual = handle.configure(320, 240).unwrap();
        assert_eq!(actual, Resolution::new(320, 240));
        // The discard reads consumed frames
        assert!(opener.stats().grabs() >= 2);
    }

    #[test]
    fn test_open_adopts_rate_echoed_after_configure() {
        // Full HD drops the device to 10fps after the probe settled on 30
        let opener = FakeOpener::new().with_high_res_fps(Resolution::HD720, 10);
        let handle = DeviceHandle::open(&opener, 0, &[Resolution::HD1080], &config()).unwrap();
        assert_eq!(handle.max_fps(), 30);
        assert_eq!(handle.target_fps(), 10);
        assert_eq!(handle.frame_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_open_failure_is_device_unavailable() {
        let opener = FakeOpener::new().failing(&[3]);
        let err = DeviceHandle::open(&opener, 3, &[], &config()).err().unwrap();
        assert!(matches!(err, AppError::DeviceUnavailable { device: 3, .. }));
    }

    #[test]
    fn test_release_is_idempotent() {
        let opener = FakeOpener::new();
        let mut handle = DeviceHandle::open(&opener, 1, &[], &config()).unwrap();
        assert_eq!(opener.stats().open_now(), 1);

        handle.release();
        handle.release();
        assert!(!handle.is_open());
        assert_eq!(opener.stats().open_now(), 0);
        assert!(handle.read_frame().is_err());

        drop(handle);
        assert_eq!(opener.stats().open_now(), 0);
    }

    #[test]
    fn test_read_frame_tags_device() {
        let opener = FakeOpener::new();
        let mut handle = DeviceHandle::open(&opener, 4, &[], &config()).unwrap();
        let frame = handle.read_frame().unwrap().unwrap();
        assert_eq!(frame.device_id, 4);
        assert_eq!(frame.data()[0], 4);
        assert_eq!(frame.format, PixelFormat::Rgb24);
    }
}
