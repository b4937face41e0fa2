//! MJPEG streaming to HTTP clients
//!
//! # Components
//!
//! - `FrameSource` - where responders pull the newest raw frame from
//! - `MjpegResponder` - per-client pacing, encoding and multipart framing
//! - `ClientRegistry` / `ClientGuard` - connected client bookkeeping

use std::sync::Arc;

use crate::video::frame::VideoFrame;

pub mod mjpeg;

pub use mjpeg::{create_mjpeg_part, ClientGuard, ClientId, ClientRegistry, MjpegResponder};

/// Read side of the frame hand-off
pub trait FrameSource: Send + Sync {
    /// Newest frame, or None if none has been produced
    fn latest_frame(&self) -> Option<Arc<VideoFrame>>;

    /// True once no more frames will ever be produced
    fn is_closed(&self) -> bool {
        false
    }
}
