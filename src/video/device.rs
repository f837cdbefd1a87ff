//! V4L2 device enumeration and format negotiation

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use crate::error::{AppError, Result};
use crate::media::{DeviceInfo, DeviceKind};

/// Packed 4:2:2 format the capture loop converts from
pub const YUYV: &[u8; 4] = b"YUYV";

/// Wrapper around a V4L2 video device
pub struct VideoDevice {
    pub path: PathBuf,
    device: Device,
}

impl VideoDevice {
    /// Open a video device by path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening video device: {:?}", path);

        let device = Device::with_path(&path)
            .map_err(|e| AppError::Capture(format!("Failed to open device {:?}: {}", path, e)))?;

        Ok(Self { path, device })
    }

    /// Card name and whether the device can capture
    pub fn describe(&self) -> Result<(String, bool)> {
        let caps = self
            .device
            .query_caps()
            .map_err(|e| AppError::Capture(format!("Failed to query capabilities: {}", e)))?;

        let can_capture = caps.capabilities.contains(Flags::VIDEO_CAPTURE)
            || caps.capabilities.contains(Flags::VIDEO_CAPTURE_MPLANE);
        Ok((caps.card, can_capture))
    }

    /// Whether the driver offers YUYV
    pub fn supports_yuyv(&self) -> bool {
        match self.device.enum_formats() {
            Ok(formats) => formats.iter().any(|f| f.fourcc == FourCC::new(YUYV)),
            Err(e) => {
                debug!("Failed to enumerate formats for {:?}: {}", self.path, e);
                false
            }
        }
    }

    /// Request YUYV at the given size; returns the size the driver chose
    pub fn set_yuyv_format(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        let fmt = Format::new(width, height, FourCC::new(YUYV));

        let actual = self
            .device
            .set_format(&fmt)
            .map_err(|e| AppError::Capture(format!("Failed to set format: {}", e)))?;

        if actual.fourcc != FourCC::new(YUYV) {
            return Err(AppError::Capture(format!(
                "Device {:?} does not support YUYV (got {})",
                self.path, actual.fourcc
            )));
        }

        if actual.width != width || actual.height != height {
            warn!(
                "Requested {}x{}, got {}x{}",
                width, height, actual.width, actual.height
            );
        }

        Ok((actual.width, actual.height))
    }

    /// Request a frame rate; failures are not fatal
    pub fn set_fps(&self, fps: u32) {
        if let Err(e) = self.device.set_params(&Parameters::with_fps(fps)) {
            warn!("Failed to set {} fps on {:?}: {}", fps, self.path, e);
        }
    }

    pub fn inner(&self) -> &Device {
        &self.device
    }
}

/// Enumerate all video capture devices, ordered by path
pub fn enumerate_video_devices() -> Result<Vec<DeviceInfo>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir("/dev")
        .map_err(|e| AppError::Capture(format!("Failed to read /dev: {}", e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"))
        })
        .collect();
    paths.sort_by_key(|p| device_index(p));

    let mut devices = Vec::new();
    for path in paths {
        let device = match VideoDevice::open(&path) {
            Ok(d) => d,
            Err(e) => {
                debug!("{}", e);
                continue;
            }
        };

        match device.describe() {
            Ok((card, true)) => {
                info!("Found capture device: {} ({:?})", card, path);
                devices.push(DeviceInfo::new(
                    path.to_string_lossy(),
                    card,
                    DeviceKind::VideoInput,
                ));
            }
            Ok((_, false)) => debug!("Skipping non-capture device: {:?}", path),
            Err(e) => debug!("Failed to get info for {:?}: {}", path, e),
        }
    }

    info!("Found {} video capture devices", devices.len());
    Ok(devices)
}

/// Numeric suffix of `/dev/videoN`, for natural ordering
fn device_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("video"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_index_ordering() {
        let mut paths = vec![
            PathBuf::from("/dev/video10"),
            PathBuf::from("/dev/video2"),
            PathBuf::from("/dev/video0"),
        ];
        paths.sort_by_key(|p| device_index(p));
        assert_eq!(paths[0], PathBuf::from("/dev/video0"));
        assert_eq!(paths[2], PathBuf::from("/dev/video10"));
    }

    #[test]
    fn test_open_missing_device() {
        assert!(VideoDevice::open("/dev/video-does-not-exist").is_err());
    }
}
