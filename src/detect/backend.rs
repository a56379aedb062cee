use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Detector backend trait.
///
/// Backends are constructed once per run and reused for every frame. They
/// return every candidate box they produce; category and score filtering
/// happen in the pipeline.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
