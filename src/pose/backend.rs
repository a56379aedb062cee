use anyhow::Result;
use image::RgbImage;

use crate::detect::Detection;
use crate::pose::instance::PoseInstance;
use crate::pose::meta::DatasetMeta;

/// Top-down pose estimator backend.
///
/// Given a frame and the boxes that survived detection filtering, returns
/// one instance per box, in box order, each with
/// `dataset_meta().num_keypoints` keypoints.
pub trait PoseBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Keypoint schema of the loaded model.
    fn dataset_meta(&self) -> &DatasetMeta;

    /// Estimate keypoints for each box.
    fn estimate(&mut self, frame: &RgbImage, boxes: &[Detection]) -> Result<Vec<PoseInstance>>;
}
