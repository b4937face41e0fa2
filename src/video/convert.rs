//! Pixel format conversion utilities

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YCbCr to RGB, fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((c + 409 * e + 128) >> 8),
        clamp_u8((c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((c + 516 * d + 128) >> 8),
    ]
}

/// Convert packed YUYV 4:2:2 into RGB24.
///
/// `rgb` is resized to `width * height * 3`.
pub fn yuyv_to_rgb24(yuyv: &[u8], rgb: &mut Vec<u8>, resolution: Resolution) -> Result<()> {
    let expected = PixelFormat::Yuyv.frame_size(resolution).unwrap_or(0);
    if resolution.width % 2 != 0 || yuyv.len() < expected {
        return Err(AppError::Encode(format!(
            "YUYV data too small for {}: {} < {}",
            resolution,
            yuyv.len(),
            expected
        )));
    }

    rgb.resize(resolution.pixels() as usize * 3, 0);
    for (src, dst) in yuyv[..expected].chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (src[0], src[1], src[2], src[3]);
        dst[..3].copy_from_slice(&yuv_to_rgb(y0, u, v));
        dst[3..].copy_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(())
}
