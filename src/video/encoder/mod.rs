//! Frame encoders
//!
//! Only JPEG is produced: every streaming client compresses the frames it
//! sends with its own [`JpegEncoder`].

pub mod jpeg;

pub use jpeg::JpegEncoder;
