//! Device enumeration and capability listing

use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::Device;

use super::format::{PixelFormat, Resolution};

/// Source of the device list and per-device resolution lists
pub trait DeviceCatalog: Send + Sync {
    /// Capture devices by index, with a display name
    fn list_devices(&self) -> BTreeMap<u32, String>;

    /// Supported resolutions of device `id`, largest first
    fn resolutions(&self, id: u32) -> Vec<Resolution>;
}

/// Catalog backed by V4L2 queries on `/dev/video*`
#[derive(Debug, Clone)]
pub struct V4l2Catalog {
    even_index_only: bool,
    fallback: Vec<Resolution>,
}

impl V4l2Catalog {
    pub fn new(even_index_only: bool, fallback: Vec<Resolution>) -> Self {
        Self {
            even_index_only,
            fallback,
        }
    }

    fn query_resolutions(&self, id: u32) -> std::io::Result<Vec<Resolution>> {
        let device = Device::new(id as usize)?;
        let mut resolutions = Vec::new();

        for desc in device.enum_formats()? {
            match PixelFormat::from_fourcc(desc.fourcc) {
                Some(PixelFormat::Mjpeg) | Some(PixelFormat::Yuyv) => {}
                _ => {
                    debug!("Skipping format {} on /dev/video{}", desc.fourcc, id);
                    continue;
                }
            }

            let sizes = match device.enum_framesizes(desc.fourcc) {
                Ok(sizes) => sizes,
                Err(e) => {
                    debug!("Failed to enumerate frame sizes for {}: {}", desc.fourcc, e);
                    continue;
                }
            };

            for size in sizes {
                match size.size {
                    FrameSizeEnum::Discrete(d) => {
                        resolutions.push(Resolution::new(d.width, d.height));
                    }
                    FrameSizeEnum::Stepwise(s) => {
                        // Offer the common sizes that fit in the range
                        for res in [
                            Resolution::VGA,
                            Resolution::HD720,
                            Resolution::HD1080,
                            Resolution::UHD4K,
                        ] {
                            if res.width >= s.min_width
                                && res.width <= s.max_width
                                && res.height >= s.min_height
                                && res.height <= s.max_height
                            {
                                resolutions.push(res);
                            }
                        }
                    }
                }
            }
        }

        Ok(sort_resolutions(resolutions))
    }
}

impl DeviceCatalog for V4l2Catalog {
    fn list_devices(&self) -> BTreeMap<u32, String> {
        let mut devices = BTreeMap::new();

        let entries = match std::fs::read_dir("/dev") {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read /dev: {}", e);
                return devices;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };

            if self.even_index_only && index % 2 != 0 {
                debug!("Skipping odd video node /dev/video{}", index);
                continue;
            }

            let caps = match Device::new(index as usize).and_then(|d| d.query_caps()) {
                Ok(caps) => caps,
                Err(e) => {
                    debug!("Failed to query /dev/video{}: {}", index, e);
                    continue;
                }
            };

            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                debug!("Skipping non-capture device /dev/video{}", index);
                continue;
            }

            info!("Found capture device {}: {} ({})", index, caps.card, caps.driver);
            devices.insert(index, caps.card);
        }

        devices
    }

    fn resolutions(&self, id: u32) -> Vec<Resolution> {
        match self.query_resolutions(id) {
            Ok(resolutions) => resolutions,
            Err(e) => {
                warn!(
                    "Failed to list resolutions of /dev/video{}: {}, using fallback",
                    id, e
                );
                self.fallback.clone()
            }
        }
    }
}

/// Deduplicate and order by descending pixel count
pub fn sort_resolutions(mut resolutions: Vec<Resolution>) -> Vec<Resolution> {
    let mut seen = std::collections::HashSet::new();
    resolutions.retain(|r| seen.insert(*r));
    // Stable, so equal pixel counts keep their enumeration order
    resolutions.sort_by(|a, b| b.pixels().cmp(&a.pixels()));
    resolutions
}

/// Pick the device offering the largest resolution
///
/// Ties go to the lowest index. Falls back to the first listed device when
/// none reports any resolution, and to 0 when nothing is listed.
pub fn select_initial_device(catalog: &dyn DeviceCatalog) -> u32 {
    let devices = catalog.list_devices();
    let Some(&first) = devices.keys().next() else {
        return 0;
    };

    let mut best: Option<(u32, u64)> = None;
    for &id in devices.keys() {
        let Some(largest) = catalog.resolutions(id).first().map(Resolution::pixels) else {
            continue;
        };
        if best.map_or(true, |(_, pixels)| largest > pixels) {
            best = Some((id, largest));
        }
    }

    best.map(|(id, _)| id).unwrap_or(first)
}
