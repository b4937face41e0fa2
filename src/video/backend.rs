//! Low-level capture backends
//!
//! A backend wraps one open device node and exposes the raw primitives
//! (frame rate and resolution requests, single frame reads). Policy such
//! as capability probing lives in [`DeviceHandle`](super::device::DeviceHandle).

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};
use v4l::buffer::Type as BufType;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format};

use super::format::{PixelFormat, Resolution};

/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;

/// Primitive operations on one open capture device
pub trait CaptureBackend: Send {
    /// Pixel format the device delivers
    fn format(&self) -> PixelFormat;

    /// Request a frame rate, returning the rate the device reports back
    fn request_frame_rate(&mut self, fps: u32) -> io::Result<u32>;

    /// Request a resolution. The device may clamp or ignore it.
    fn request_resolution(&mut self, resolution: Resolution) -> io::Result<()>;

    /// Resolution the device is actually configured for
    fn current_resolution(&mut self) -> io::Result<Resolution>;

    /// Blocking read of one frame. `Ok(None)` means no usable frame this time.
    fn grab(&mut self) -> io::Result<Option<Bytes>>;

    /// Close the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens capture backends by device index
pub trait BackendOpener: Send + Sync {
    fn open(&self, id: u32) -> io::Result<Box<dyn CaptureBackend>>;
}

/// Opens `/dev/videoN` through V4L2
#[derive(Debug, Clone)]
pub struct V4l2Opener {
    buffer_count: u32,
    read_timeout: Duration,
}

impl V4l2Opener {
    pub fn new(buffer_count: u32, read_timeout: Duration) -> Self {
        Self {
            buffer_count: buffer_count.max(1),
            read_timeout,
        }
    }
}

impl BackendOpener for V4l2Opener {
    fn open(&self, id: u32) -> io::Result<Box<dyn CaptureBackend>> {
        let backend = V4l2Backend::open(id, self.buffer_count, self.read_timeout)?;
        Ok(Box::new(backend))
    }
}

/// V4L2 capture device using memory-mapped buffers
///
/// The mmap stream is created lazily on the first read and torn down
/// whenever the format or frame rate changes, since most drivers refuse
/// reconfiguration while buffers are allocated.
pub struct V4l2Backend {
    id: u32,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    format: PixelFormat,
    buffer_count: u32,
    read_timeout: Duration,
}

impl V4l2Backend {
    pub fn open(id: u32, buffer_count: u32, read_timeout: Duration) -> io::Result<Self> {
        debug!("Opening video device /dev/video{}", id);
        let device = Device::new(id as usize)?;

        // Ask for MJPEG at whatever size the device is currently set to
        let current = device.format()?;
        let requested = Format::new(current.width, current.height, PixelFormat::Mjpeg.to_fourcc());
        let actual = device.set_format(&requested)?;

        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported pixel format {}", actual.fourcc),
            )
        })?;
        if format != PixelFormat::Mjpeg {
            warn!(
                "Device /dev/video{} does not support MJPEG, capturing {}",
                id, format
            );
        }

        Ok(Self {
            id,
            device: Some(device),
            stream: None,
            format,
            buffer_count,
            read_timeout,
        })
    }

    fn device(&self) -> io::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device closed"))
    }

    fn ensure_stream(&mut self) -> io::Result<&mut MmapStream<'static>> {
        if self.stream.is_none() {
            let mut stream =
                MmapStream::with_buffers(self.device()?, BufType::VideoCapture, self.buffer_count)?;
            stream.set_timeout(self.read_timeout);
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream unavailable"))
    }
}

impl CaptureBackend for V4l2Backend {
    fn format(&self) -> PixelFormat {
        self.format
    }

    fn request_frame_rate(&mut self, fps: u32) -> io::Result<u32> {
        self.stream = None;
        let params = self.device()?.set_params(&Parameters::with_fps(fps))?;
        Ok(fraction_to_fps(
            params.interval.numerator,
            params.interval.denominator,
        ))
    }

    fn request_resolution(&mut self, resolution: Resolution) -> io::Result<()> {
        self.stream = None;
        let requested = Format::new(resolution.width, resolution.height, self.format.to_fourcc());
        let actual = self.device()?.set_format(&requested)?;
        if let Some(format) = PixelFormat::from_fourcc(actual.fourcc) {
            self.format = format;
        }
        Ok(())
    }

    fn current_resolution(&mut self) -> io::Result<Resolution> {
        let format = self.device()?.format()?;
        Ok(Resolution::new(format.width, format.height))
    }

    fn grab(&mut self) -> io::Result<Option<Bytes>> {
        let stream = self.ensure_stream()?;
        let (buf, meta) = stream.next()?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            debug!("Dropping small frame: {} bytes", used);
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&buf[..used])))
    }

    fn close(&mut self) {
        // Stop streaming before the last handle to the fd goes away
        self.stream = None;
        if self.device.take().is_some() {
            debug!("Closed video device /dev/video{}", self.id);
        }
    }
}

impl Drop for V4l2Backend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert a V4L2 frame interval to whole frames per second
pub fn fraction_to_fps(numerator: u32, denominator: u32) -> u32 {
    if numerator == 0 {
        return 0;
    }
    (denominator as f64 / numerator as f64).round() as u32
}
