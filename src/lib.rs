//! Webcam Streamer - live MJPEG streaming for V4L2 video devices
//!
//! A single background relay captures frames from the active device and
//! hands the newest one to any number of HTTP clients, each served as a
//! `multipart/x-mixed-replace` stream. The active device can be switched
//! at runtime without restarting the server.

pub mod config;
pub mod error;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
