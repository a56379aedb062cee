use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection, DetectionResult};

/// Stub detector for testing.
///
/// Replays a fixed set of detections expressed in normalized (0..1)
/// coordinates, scaled to each frame's size.
pub struct StubDetector {
    detections: Vec<Detection>,
    calls: u64,
}

impl StubDetector {
    /// Detections are given in normalized coordinates.
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    /// A single person box covering the middle of the frame.
    pub fn centered_person() -> Self {
        Self::new(vec![Detection::new(
            BBox::new(0.25, 0.1, 0.75, 0.9),
            0.95,
            0,
        )])
    }

    /// Number of frames seen so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::centered_person()
    }
}

impl DetectorBackend for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        self.calls += 1;
        let w = frame.width() as f32;
        let h = frame.height() as f32;
        let detections = self
            .detections
            .iter()
            .map(|det| {
                Detection::new(
                    BBox::new(det.bbox.x1 * w, det.bbox.y1 * h, det.bbox.x2 * w, det.bbox.y2 * h),
                    det.score,
                    det.label,
                )
            })
            .collect();
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_detector_scales_to_frame() {
        let mut detector = StubDetector::centered_person();
        let frame = RgbImage::new(200, 100);

        let result = detector.detect(&frame).unwrap();
        assert_eq!(result.len(), 1);
        let det = result.detections[0];
        assert_eq!(det.bbox, BBox::new(50.0, 10.0, 150.0, 90.0));
        assert_eq!(det.score, 0.95);
        assert_eq!(det.label, 0);
        assert_eq!(detector.calls(), 1);
    }

    #[test]
    fn empty_stub_detects_nothing() {
        let mut detector = StubDetector::new(Vec::new());
        let result = detector.detect(&RgbImage::new(8, 8)).unwrap();
        assert!(result.is_empty());
    }
}
