//! In-memory capture backend for tests

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{BackendOpener, CaptureBackend};
use super::catalog::DeviceCatalog;
use super::format::{PixelFormat, Resolution};

/// Counters shared by every backend a [`FakeOpener`] hands out
#[derive(Debug, Default)]
pub struct FakeStats {
    opens: AtomicUsize,
    open_now: AtomicUsize,
    peak_open: AtomicUsize,
    grabs: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
    close_times: Mutex<Vec<Instant>>,
}

impl FakeStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn peak_open(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }

    /// When each successful open happened, in order
    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().clone()
    }

    /// When each backend was closed, in order
    pub fn close_times(&self) -> Vec<Instant> {
        self.close_times.lock().clone()
    }
}

#[derive(Clone)]
pub struct FakeOpener {
    max_fps: u32,
    /// Lower rate cap once the resolution exceeds the given size
    high_res_fps: Option<(Resolution, u32)>,
    reject_rates: bool,
    limit: Option<Resolution>,
    failing: Arc<Mutex<HashSet<u32>>>,
    grab_delay: Duration,
    grab_error: bool,
    stats: Arc<FakeStats>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self {
            max_fps: 30,
            high_res_fps: None,
            reject_rates: false,
            limit: None,
            failing: Arc::new(Mutex::new(HashSet::new())),
            grab_delay: Duration::ZERO,
            grab_error: false,
            stats: Arc::new(FakeStats::default()),
        }
    }

    pub fn with_max_fps(mut self, fps: u32) -> Self {
        self.max_fps = fps;
        self
    }

    pub fn with_high_res_fps(mut self, above: Resolution, fps: u32) -> Self {
        self.high_res_fps = Some((above, fps));
        self
    }

    pub fn rejecting_frame_rates(mut self) -> Self {
        self.reject_rates = true;
        self
    }

    pub fn with_resolution_limit(mut self, limit: Resolution) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    pub fn with_grab_errors(mut self) -> Self {
        self.grab_error = true;
        self
    }

    pub fn failing(self, ids: &[u32]) -> Self {
        self.failing.lock().extend(ids.iter().copied());
        self
    }

    pub fn set_failing(&self, id: u32, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        self.stats.clone()
    }
}

impl BackendOpener for FakeOpener {
    fn open(&self, id: u32) -> io::Result<Box<dyn CaptureBackend>> {
        if self.failing.lock().contains(&id) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }

        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_open.fetch_max(now, Ordering::SeqCst);
        self.stats.open_times.lock().push(Instant::now());

        Ok(Box::new(FakeBackend {
            id,
            fps: 0,
            opener: self.clone(),
            resolution: Resolution::new(8, 8),
            open: true,
        }))
    }
}

/// Delivers RGB24 frames whose every byte equals the device id
pub struct FakeBackend {
    id: u32,
    fps: u32,
    opener: FakeOpener,
    resolution: Resolution,
    open: bool,
}

impl CaptureBackend for FakeBackend {
    fn format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn request_frame_rate(&mut self, fps: u32) -> io::Result<u32> {
        if self.opener.reject_rates {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "rejected"));
        }
        let cap = match self.opener.high_res_fps {
            Some((above, slow)) if self.resolution.pixels() > above.pixels() => {
                slow.min(self.opener.max_fps)
            }
            _ => self.opener.max_fps,
        };
        self.fps = fps.min(cap);
        Ok(self.fps)
    }

    fn request_resolution(&mut self, resolution: Resolution) -> io::Result<()> {
        self.resolution = match self.opener.limit {
            Some(limit) if resolution.pixels() > limit.pixels() => limit,
            _ => resolution,
        };
        Ok(())
    }

    fn current_resolution(&mut self) -> io::Result<Resolution> {
        Ok(self.resolution)
    }

    fn grab(&mut self) -> io::Result<Option<Bytes>> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        if !self.opener.grab_delay.is_zero() {
            std::thread::sleep(self.opener.grab_delay);
        }
        self.opener.stats.grabs.fetch_add(1, Ordering::SeqCst);
        if self.opener.grab_error {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated read error"));
        }
        let len = self.resolution.pixels() as usize * 3;
        Ok(Some(Bytes::from(vec![self.id as u8; len])))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.opener.stats.open_now.fetch_sub(1, Ordering::SeqCst);
            self.opener.stats.close_times.lock().push(Instant::now());
        }
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
pub struct FakeCatalog {
    devices: BTreeMap<u32, String>,
    resolutions: HashMap<u32, Vec<Resolution>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, id: u32, name: &str, resolutions: &[Resolution]) -> Self {
        self.devices.insert(id, name.to_string());
        self.resolutions.insert(id, resolutions.to_vec());
        self
    }
}

impl DeviceCatalog for FakeCatalog {
    fn list_devices(&self) -> BTreeMap<u32, String> {
        self.devices.clone()
    }

    fn resolutions(&self, id: u32) -> Vec<Resolution> {
        self.resolutions.get(&id).cloned().unwrap_or_default()
    }
}
