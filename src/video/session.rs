//! Stream session controller
//!
//! Owns the active device and its frame relay, and switches between devices
//! at runtime without disturbing connected streaming clients.
//!
//! ```text
//! Idle ──> Opening ──> Streaming ──> SwitchingDevice ──> Streaming
//!            ^  |                          |
//!            └──┘<─────── (failure) ───────┘
//!                      any ──> Closed
//! ```

use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::backend::BackendOpener;
use super::catalog::DeviceCatalog;
use super::device::DeviceHandle;
use super::frame::{FrameSlot, VideoFrame};
use super::relay::FrameRelay;
use crate::config::VideoConfig;
use crate::error::{AppError, Result};
use crate::stream::FrameSource;

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing opened yet
    Idle,
    /// Opening a device, or waiting for a retry after a failed open
    Opening,
    /// Relay running
    Streaming,
    /// Tearing down the old device and opening the new one
    SwitchingDevice,
    /// Shut down
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Opening => write!(f, "opening"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::SwitchingDevice => write!(f, "switching_device"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of the session, readable without the switch lock
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub device_id: u32,
    pub state: SessionState,
    pub relay_running: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub max_fps: u32,
    pub generation: u64,
}

/// State only touched while a switch is in progress
struct Controller {
    relay: Option<FrameRelay>,
}

pub struct StreamSession {
    opener: Arc<dyn BackendOpener>,
    catalog: Arc<dyn DeviceCatalog>,
    config: VideoConfig,
    /// Serializes start, switch and shutdown
    control: Mutex<Controller>,
    /// Slot of the running relay; None between teardown and restart
    current_slot: ArcSwapOption<FrameSlot>,
    state_tx: watch::Sender<SessionState>,
    device_id: AtomicU32,
    relay_running: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    fps: AtomicU32,
    max_fps: AtomicU32,
    generation: AtomicU64,
    /// Live relay tasks, including detached ones that missed their stop deadline
    running_relays: Arc<AtomicUsize>,
}

impl StreamSession {
    pub fn new(
        opener: Arc<dyn BackendOpener>,
        catalog: Arc<dyn DeviceCatalog>,
        config: VideoConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            opener,
            catalog,
            config,
            control: Mutex::new(Controller { relay: None }),
            current_slot: ArcSwapOption::empty(),
            state_tx,
            device_id: AtomicU32::new(0),
            relay_running: AtomicBool::new(false),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            fps: AtomicU32::new(0),
            max_fps: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            running_relays: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn device_id(&self) -> u32 {
        self.device_id.load(Ordering::SeqCst)
    }

    pub fn is_relay_running(&self) -> bool {
        self.relay_running.load(Ordering::SeqCst)
    }

    /// Number of relay tasks currently alive
    pub fn active_relays(&self) -> usize {
        self.running_relays.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            device_id: self.device_id(),
            state: self.state(),
            relay_running: self.is_relay_running(),
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            fps: self.fps.load(Ordering::Relaxed),
            max_fps: self.max_fps.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Relaxed),
        }
    }

    /// Newest frame of the running relay
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.current_slot.load_full().and_then(|slot| slot.latest())
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Stream session: {} -> {}", previous, state);
        }
    }

    /// Open the initial device and start streaming.
    pub async fn start(&self, id: u32) -> Result<()> {
        let mut control = self.control.lock().await;
        match self.state() {
            SessionState::Closed => {
                return Err(AppError::ServiceUnavailable(
                    "stream session is closed".to_string(),
                ))
            }
            SessionState::Streaming if control.relay.is_some() => {
                return Err(AppError::BadRequest(
                    "stream session already started".to_string(),
                ))
            }
            _ => {}
        }

        self.set_state(SessionState::Opening);
        self.device_id.store(id, Ordering::SeqCst);
        if let Err(e) = self.open_and_start(&mut control, id).await {
            error!("Failed to start streaming from camera {}: {}", id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Replace the active device with `id`.
    ///
    /// Requests are serialized. Switching to the device that is already
    /// streaming is a no-op. On failure the session is left in `Opening`
    /// with no device open and no relay running, and a later switch may
    /// retry any id.
    pub async fn switch_device(&self, id: u32) -> Result<()> {
        let mut control = self.control.lock().await;

        match self.state() {
            SessionState::Closed => {
                return Err(AppError::ServiceUnavailable(
                    "stream session is closed".to_string(),
                ))
            }
            SessionState::Streaming if self.device_id() == id && control.relay.is_some() => {
                debug!("Camera {} already streaming", id);
                return Ok(());
            }
            _ => {}
        }

        info!("Switching camera {} -> {}", self.device_id(), id);
        self.set_state(SessionState::SwitchingDevice);

        let result = match self.teardown(&mut control).await {
            Ok(released) => {
                if released {
                    // Give the driver time to let go of the old device
                    tokio::time::sleep(self.config.settle_delay()).await;
                }
                self.device_id.store(id, Ordering::SeqCst);
                self.open_and_start(&mut control, id).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Switched to camera {}", id);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Opening);
                warn!("Switch to camera {} failed: {}", id, e);
                Err(AppError::SwitchFailed {
                    device: id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stop the relay and release the device. Both steps run even if the
    /// first one fails.
    pub async fn shutdown(&self) {
        let mut control = self.control.lock().await;
        if self.state() == SessionState::Closed {
            return;
        }

        info!("Shutting down stream session");
        if let Err(e) = self.teardown(&mut control).await {
            warn!("Stream session shutdown incomplete: {}", e);
        }
        self.set_state(SessionState::Closed);
    }

    /// Open device `id` and start a relay for it. Caller holds the switch lock.
    async fn open_and_start(&self, control: &mut Controller, id: u32) -> Result<()> {
        let live = self.active_relays();
        if live > 0 {
            return Err(AppError::Internal(format!(
                "{} frame relay(s) still running",
                live
            )));
        }

        let opener = self.opener.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let device = tokio::task::spawn_blocking(move || {
            let resolutions = catalog.resolutions(id);
            DeviceHandle::open(opener.as_ref(), id, &resolutions, &config)
        })
        .await
        .map_err(|e| AppError::Internal(format!("device open task failed: {}", e)))??;

        let resolution = device.resolution();
        self.width.store(resolution.width, Ordering::Relaxed);
        self.height.store(resolution.height, Ordering::Relaxed);
        self.fps.store(device.target_fps(), Ordering::Relaxed);
        self.max_fps.store(device.max_fps(), Ordering::Relaxed);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let relay = FrameRelay::start(device, generation, self.running_relays.clone());
        self.current_slot.store(Some(relay.slot()));
        control.relay = Some(relay);
        self.relay_running.store(true, Ordering::SeqCst);

        self.set_state(SessionState::Streaming);
        Ok(())
    }

    /// Stop the relay, drop its buffered frame and release its device.
    ///
    /// Returns whether a device was released. Fails when the relay does not
    /// exit in time; its device is then released whenever it does exit.
    async fn teardown(&self, control: &mut Controller) -> Result<bool> {
        // Readers see no frame from here on
        self.current_slot.store(None);
        self.relay_running.store(false, Ordering::SeqCst);

        let Some(relay) = control.relay.take() else {
            return Ok(false);
        };
        let device_id = relay.device_id();
        let slot = relay.slot();

        let stopped = relay.stop(self.config.relay_join_timeout()).await;
        slot.clear();

        match stopped {
            Some(mut device) => {
                device.release();
                Ok(true)
            }
            None => Err(AppError::Internal(format!(
                "frame relay for camera {} did not stop",
                device_id
            ))),
        }
    }
}

impl FrameSource for StreamSession {
    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        StreamSession::latest_frame(self)
    }

    fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }
}
