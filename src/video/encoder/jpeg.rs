//! JPEG encoder implementation
//!
//! Compresses raw captured frames with turbojpeg at a fixed quality. MJPEG
//! input is decoded and re-encoded so the configured quality always applies.

use bytes::Bytes;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp};

use crate::error::{AppError, Result};
use crate::video::convert::yuyv_to_rgb24;
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// JPEG encoder using turbojpeg
///
/// ```text
/// MJPEG ──decompress──> RGB24 ──┐
/// YUYV ───BT.601──────> RGB24 ──┼──turbojpeg──> JPEG
/// RGB24 / BGR24 / GREY ─────────┘
/// ```
///
/// Note: turbojpeg handles are not thread-safe. Every streaming client owns
/// its own encoder.
pub struct JpegEncoder {
    compressor: Compressor,
    decompressor: Decompressor,
    /// Scratch RGB buffer for decoded or converted input
    rgb_buffer: Vec<u8>,
}

impl JpegEncoder {
    /// Create a new JPEG encoder
    pub fn new(quality: u32, optimize: bool) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(AppError::Encode(format!(
                "JPEG quality must be 1-100, got {}",
                quality
            )));
        }

        let mut compressor = Compressor::new()
            .map_err(|e| AppError::Encode(format!("Failed to create turbojpeg compressor: {}", e)))?;
        compressor
            .set_quality(quality as i32)
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_optimize(optimize)
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG optimize flag: {}", e)))?;

        let decompressor = Decompressor::new()
            .map_err(|e| AppError::Encode(format!("Failed to create turbojpeg decoder: {}", e)))?;

        Ok(Self {
            compressor,
            decompressor,
            rgb_buffer: Vec::new(),
        })
    }

    /// Encode one captured frame to JPEG bytes
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let data = frame.data();
        let resolution = frame.resolution;

        let jpeg = match frame.format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => {
                let resolution = self.decode_mjpeg(data)?;
                compress(
                    &mut self.compressor,
                    &self.rgb_buffer,
                    resolution,
                    TJPixelFormat::RGB,
                )?
            }
            PixelFormat::Yuyv => {
                yuyv_to_rgb24(data, &mut self.rgb_buffer, resolution)?;
                compress(
                    &mut self.compressor,
                    &self.rgb_buffer,
                    resolution,
                    TJPixelFormat::RGB,
                )?
            }
            PixelFormat::Rgb24 => {
                check_size(data, frame.format, resolution)?;
                compress(&mut self.compressor, data, resolution, TJPixelFormat::RGB)?
            }
            PixelFormat::Bgr24 => {
                check_size(data, frame.format, resolution)?;
                compress(&mut self.compressor, data, resolution, TJPixelFormat::BGR)?
            }
            PixelFormat::Grey => {
                check_size(data, frame.format, resolution)?;
                compress(&mut self.compressor, data, resolution, TJPixelFormat::GRAY)?
            }
        };

        Ok(Bytes::from(jpeg))
    }

    /// Decode MJPEG into the scratch buffer, returning the decoded size
    fn decode_mjpeg(&mut self, mjpeg: &[u8]) -> Result<Resolution> {
        let header = self
            .decompressor
            .read_header(mjpeg)
            .map_err(|e| AppError::Encode(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        self.rgb_buffer.resize(header.height * pitch, 0);
        let image = Image {
            pixels: self.rgb_buffer.as_mut_slice(),
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(mjpeg, image)
            .map_err(|e| AppError::Encode(format!("turbojpeg decode failed: {}", e)))?;

        Ok(Resolution::new(header.width as u32, header.height as u32))
    }
}

fn check_size(data: &[u8], format: PixelFormat, resolution: Resolution) -> Result<()> {
    let expected = format.frame_size(resolution).unwrap_or(0);
    if data.len() < expected {
        return Err(AppError::Encode(format!(
            "{} data too small: {} < {}",
            format,
            data.len(),
            expected
        )));
    }
    Ok(())
}

fn compress(
    compressor: &mut Compressor,
    pixels: &[u8],
    resolution: Resolution,
    format: TJPixelFormat,
) -> Result<Vec<u8>> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    if width == 0 || height == 0 {
        return Err(AppError::Encode(format!("Invalid frame size {}", resolution)));
    }

    // Grayscale input can only be compressed without chroma planes
    let (bytes_per_pixel, subsamp) = match format {
        TJPixelFormat::GRAY => (1, Subsamp::Gray),
        _ => (3, Subsamp::Sub2x2),
    };
    compressor
        .set_subsamp(subsamp)
        .map_err(|e| AppError::Encode(format!("Failed to set JPEG subsampling: {}", e)))?;

    let image = Image {
        pixels,
        width,
        pitch: width * bytes_per_pixel,
        height,
        format,
    };

    compressor
        .compress_to_vec(image)
        .map_err(|e| AppError::Encode(format!("JPEG compression failed: {}", e)))
}
