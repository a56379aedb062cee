//! Camera frame source for `--input webcam`.
//!
//! `stub://` devices produce synthetic frames for tests. Real device nodes
//! (e.g. `/dev/video0`) are read through V4L2 and need the `ingest-v4l2`
//! feature.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

#[cfg(feature = "ingest-v4l2")]
mod device;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod pixels;

use crate::config::CameraSettings;

/// Capture parameters for a camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested frame rate; 0 leaves the device default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: crate::config::DEFAULT_CAMERA_DEVICE.to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

impl From<&CameraSettings> for CameraConfig {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            device: settings.device.clone(),
            ..Self::default()
        }
    }
}

/// One captured frame with its output identifier.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    pub id: String,
    pub image: RgbImage,
}

/// Identifier for the `index`-th captured frame (1-based).
pub fn frame_id(index: u64) -> String {
    format!("webcam_{:06}.jpg", index)
}

pub struct CameraSource {
    backend: CameraBackend,
    frames: u64,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(device::DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let backend = if config.device.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCamera::new(config))
        } else {
            device_backend(config)?
        };
        Ok(Self { backend, frames: 0 })
    }

    /// Open the device and start streaming.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.connect(),
        }
    }

    pub fn next_frame(&mut self) -> Result<CameraFrame> {
        let image = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.next_frame()?,
        };
        self.frames += 1;
        Ok(CameraFrame {
            id: frame_id(self.frames),
            image,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }
}

#[cfg(feature = "ingest-v4l2")]
fn device_backend(config: CameraConfig) -> Result<CameraBackend> {
    Ok(CameraBackend::Device(device::DeviceCamera::new(config)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_backend(config: CameraConfig) -> Result<CameraBackend> {
    Err(anyhow!(
        "camera device {} requires the `ingest-v4l2` feature",
        config.device
    ))
}

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic camera {} has an empty frame size", self.config.device));
        }
        log::info!("camera: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    /// Gradient background with a bright block drifting across it.
    fn next_frame(&mut self) -> RgbImage {
        self.frame_count += 1;
        let (width, height) = (self.config.width, self.config.height);
        let block_w = (width / 4).max(1);
        let block_x = ((self.frame_count * 8) % width as u64) as u32;
        let (top, bottom) = (height / 5, height - height / 5);
        RgbImage::from_fn(width, height, |x, y| {
            if x >= block_x && x < block_x + block_w && y >= top && y < bottom {
                Rgb([230, 200, 170])
            } else {
                let shade = ((x + y + self.frame_count as u32) % 256) as u8;
                Rgb([shade / 2, shade / 3, shade / 4])
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://camera".to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
        }
    }

    #[test]
    fn synthetic_camera_numbers_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!(first.id, "webcam_000001.jpg");
        assert_eq!(second.id, "webcam_000002.jpg");
        assert_eq!(first.image.dimensions(), (64, 48));
        assert_ne!(first.image, second.image);
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn settings_select_device() {
        let settings = CameraSettings {
            device: "stub://cam1".into(),
            max_frames: 3,
        };
        let config = CameraConfig::from(&settings);
        assert_eq!(config.device, "stub://cam1");
        assert_eq!(config.width, 640);
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_needs_feature() {
        let config = CameraConfig {
            device: "/dev/video0".into(),
            ..stub_config()
        };
        let err = CameraSource::new(config).err().expect("device camera without feature");
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
