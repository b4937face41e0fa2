//! Video capture
//!
//! Device access, the background frame relay, the session controller that
//! switches devices, and JPEG encoding of captured frames.

pub mod backend;
pub mod catalog;
pub mod convert;
pub mod device;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod relay;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendOpener, CaptureBackend, V4l2Opener};
pub use catalog::{select_initial_device, DeviceCatalog, V4l2Catalog};
pub use device::DeviceHandle;
pub use encoder::JpegEncoder;
pub use format::{PixelFormat, Resolution};
pub use frame::{FrameSlot, VideoFrame};
pub use relay::FrameRelay;
pub use session::{SessionInfo, SessionState, StreamSession};
