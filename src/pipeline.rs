//! Per-image detection, pose estimation and rendering.

use anyhow::{Context, Result};
use image::RgbImage;

use crate::config::RunConfig;
use crate::detect::{select_boxes, DetectorBackend};
use crate::pose::{PoseBackend, PredictedInstances};
use crate::visualize::Visualizer;

/// Result of processing one image.
#[derive(Clone, Debug, Default)]
pub struct ImageOutcome {
    /// Number of person boxes kept after filtering and NMS.
    pub boxes: usize,
    /// `None` when no box survived.
    pub instances: Option<PredictedInstances>,
    /// Rendered frame when a visualizer is attached.
    pub frame: Option<RgbImage>,
}

impl ImageOutcome {
    pub fn instance_count(&self) -> usize {
        self.instances.as_ref().map_or(0, PredictedInstances::len)
    }
}

/// Run the two-stage pipeline over one RGB frame.
///
/// The pose backend is not invoked when no box survives filtering.
pub fn process_one_image(
    frame: &RgbImage,
    detector: &mut dyn DetectorBackend,
    pose: &mut dyn PoseBackend,
    cfg: &RunConfig,
    visualizer: Option<&Visualizer>,
) -> Result<ImageOutcome> {
    let detections = detector
        .detect(frame)
        .with_context(|| format!("{} detector failed", detector.name()))?;
    let boxes = select_boxes(&detections, cfg.det_cat_id, cfg.bbox_thr, cfg.nms_thr);
    log::debug!(
        "detector {}: {} candidates, {} kept",
        detector.name(),
        detections.len(),
        boxes.len()
    );

    let instances = if boxes.is_empty() {
        None
    } else {
        let estimates = pose
            .estimate(frame, &boxes)
            .with_context(|| format!("{} pose estimator failed", pose.name()))?;
        PredictedInstances::merge(estimates)
    };

    let rendered = visualizer.map(|vis| vis.render(frame, instances.as_ref()));

    Ok(ImageOutcome {
        boxes: boxes.len(),
        instances,
        frame: rendered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrawSettings;
    use crate::detect::{BBox, Detection, DetectionResult, StubDetector};
    use crate::pose::{DatasetMeta, PoseInstance, StubPoseEstimator};
    use anyhow::anyhow;

    fn cfg() -> RunConfig {
        RunConfig::new("stub://det", "stub://det", "stub://pose", "stub://pose", "a.jpg")
    }

    struct CountingPose {
        inner: StubPoseEstimator,
        calls: usize,
    }

    impl PoseBackend for CountingPose {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn dataset_meta(&self) -> &DatasetMeta {
            self.inner.dataset_meta()
        }

        fn estimate(&mut self, frame: &RgbImage, boxes: &[Detection]) -> Result<Vec<PoseInstance>> {
            self.calls += 1;
            self.inner.estimate(frame, boxes)
        }
    }

    struct FailingDetector;

    impl DetectorBackend for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &RgbImage) -> Result<DetectionResult> {
            Err(anyhow!("corrupt tensor"))
        }
    }

    #[test]
    fn one_person_yields_one_instance() {
        let mut detector = StubDetector::centered_person();
        let mut pose = StubPoseEstimator::default();
        let outcome = process_one_image(&RgbImage::new(64, 64), &mut detector, &mut pose, &cfg(), None).unwrap();

        assert_eq!(outcome.boxes, 1);
        assert_eq!(outcome.instance_count(), 1);
        let instances = outcome.instances.unwrap();
        assert_eq!(instances.instances[0].num_keypoints(), 17);
        assert!((instances.instances[0].bbox_score - 0.95).abs() < 1e-6);
        assert!(outcome.frame.is_none());
    }

    #[test]
    fn no_boxes_skips_pose() {
        let mut detector = StubDetector::new(vec![Detection::new(BBox::new(0.1, 0.1, 0.5, 0.5), 0.2, 0)]);
        let mut pose = CountingPose {
            inner: StubPoseEstimator::default(),
            calls: 0,
        };
        let outcome = process_one_image(&RgbImage::new(32, 32), &mut detector, &mut pose, &cfg(), None).unwrap();

        assert!(outcome.instances.is_none());
        assert_eq!(pose.calls, 0);
    }

    #[test]
    fn other_categories_are_ignored() {
        let mut detector = StubDetector::new(vec![Detection::new(BBox::new(0.1, 0.1, 0.5, 0.5), 0.9, 2)]);
        let mut pose = StubPoseEstimator::default();
        let outcome = process_one_image(&RgbImage::new(32, 32), &mut detector, &mut pose, &cfg(), None).unwrap();
        assert_eq!(outcome.boxes, 0);

        let mut cars = cfg();
        cars.det_cat_id = 2;
        let outcome = process_one_image(&RgbImage::new(32, 32), &mut detector, &mut pose, &cars, None).unwrap();
        assert_eq!(outcome.instance_count(), 1);
    }

    #[test]
    fn visualizer_renders_frame() {
        let vis = Visualizer::new(DrawSettings::default(), DatasetMeta::coco()).unwrap();
        let mut detector = StubDetector::centered_person();
        let mut pose = StubPoseEstimator::default();
        let frame = RgbImage::new(80, 60);
        let outcome = process_one_image(&frame, &mut detector, &mut pose, &cfg(), Some(&vis)).unwrap();

        let rendered = outcome.frame.unwrap();
        assert_eq!(rendered.dimensions(), (80, 60));
        assert_ne!(rendered, frame);
    }

    #[test]
    fn detector_errors_name_the_backend() {
        let mut pose = StubPoseEstimator::default();
        let err = process_one_image(&RgbImage::new(8, 8), &mut FailingDetector, &mut pose, &cfg(), None).unwrap_err();
        assert!(err.to_string().contains("failing detector failed"));
    }
}
