//! Frame relay: background acquisition for one open device
//!
//! One relay runs per device handle. It reads frames in a blocking task
//! and publishes each into its own [`FrameSlot`], overwriting anything
//! unread. Stopping hands the device back to the caller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::DeviceHandle;
use super::frame::FrameSlot;
use crate::error::AppError;
use crate::utils::LogThrottler;

/// Poll interval while the device reports closed
const IDLE_INTERVAL: Duration = Duration::from_millis(100);
/// Minimum pause after a failed read
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Keeps a live-relay counter accurate for as long as the task runs
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a running relay task
pub struct FrameRelay {
    device_id: u32,
    slot: Arc<FrameSlot>,
    stop_flag: Arc<AtomicBool>,
    handle: JoinHandle<DeviceHandle>,
}

impl FrameRelay {
    /// Move `device` into a new acquisition task.
    ///
    /// `running` is incremented while the task is alive, including any time
    /// it keeps running after a timed-out stop.
    pub fn start(device: DeviceHandle, generation: u64, running: Arc<AtomicUsize>) -> Self {
        let device_id = device.id();
        let slot = Arc::new(FrameSlot::new(generation));
        let stop_flag = Arc::new(AtomicBool::new(false));

        info!(
            "Starting frame relay for camera {} (generation {})",
            device_id, generation
        );

        let guard = RunningGuard::new(running);
        let task_slot = slot.clone();
        let task_stop = stop_flag.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            relay_loop(device, &task_slot, &task_stop)
        });

        Self {
            device_id,
            slot,
            stop_flag,
            handle,
        }
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Hand-off slot this relay publishes into
    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    /// Signal the task to stop and wait up to `timeout` for it.
    ///
    /// Returns the device on a clean exit. A task that does not exit in
    /// time is logged and left to finish on its own; its device is then
    /// released when the task ends.
    pub async fn stop(self, timeout: Duration) -> Option<DeviceHandle> {
        debug!("Stopping frame relay for camera {}", self.device_id);
        self.stop_flag.store(true, Ordering::SeqCst);

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(device)) => {
                info!("Frame relay for camera {} stopped", self.device_id);
                Some(device)
            }
            Ok(Err(e)) => {
                error!("Frame relay for camera {} failed: {}", self.device_id, e);
                None
            }
            Err(_) => {
                error!(
                    "Frame relay for camera {} did not stop within {:?}",
                    self.device_id, timeout
                );
                None
            }
        }
    }
}

fn relay_loop(mut device: DeviceHandle, slot: &FrameSlot, stop_flag: &AtomicBool) -> DeviceHandle {
    let throttler = LogThrottler::with_secs(5);

    while !stop_flag.load(Ordering::Relaxed) {
        if !device.is_open() {
            std::thread::sleep(IDLE_INTERVAL);
            continue;
        }

        let started = Instant::now();
        let ok = match device.read_frame() {
            Ok(Some(frame)) => {
                slot.publish(frame);
                // Recovered: report the next failure right away
                throttler.clear("timeout");
                throttler.clear("read");
                true
            }
            Ok(None) => false,
            Err(AppError::ReadTimeout) => {
                if let Some(suppressed) = throttler.check("timeout") {
                    warn!(
                        "Camera {}: capture timeout - no signal? (suppressed {} repeats)",
                        device.id(),
                        suppressed
                    );
                }
                false
            }
            Err(e) => {
                if let Some(suppressed) = throttler.check("read") {
                    error!(
                        "Camera {}: capture error: {} (suppressed {} repeats)",
                        device.id(),
                        e,
                        suppressed
                    );
                }
                false
            }
        };

        // Advisory pacing to the negotiated frame rate
        let remaining = device.frame_interval().saturating_sub(started.elapsed());
        let pause = if ok { remaining } else { remaining.max(RETRY_DELAY) };
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }

    debug!(
        "Frame relay for camera {} exiting after {} frames",
        device.id(),
        slot.published()
    );
    device
}
