#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::Detection;
use crate::model_config::PoseModelConfig;
use crate::pose::backend::PoseBackend;
use crate::pose::crop::{decode_heatmaps, pose_region, sample_crop};
use crate::pose::instance::{Heatmap, PoseInstance};
use crate::pose::meta::DatasetMeta;

/// Tract-based top-down estimator for heatmap ONNX models.
///
/// Expects one input `[1, 3, H, W]` and one output `[1, K, h, w]` where `K`
/// matches the dataset schema. Boxes are run one at a time.
pub struct TractPoseEstimator {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    config: PoseModelConfig,
    meta: DatasetMeta,
    output_heatmaps: bool,
}

impl TractPoseEstimator {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        config: PoseModelConfig,
        output_heatmaps: bool,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let meta = config.dataset_meta()?;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        config.input_height as usize,
                        config.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            config,
            meta,
            output_heatmaps,
        })
    }

    fn estimate_one(&self, frame: &RgbImage, det: &Detection) -> Result<PoseInstance> {
        let width = self.config.input_width as usize;
        let height = self.config.input_height as usize;
        let region = pose_region(&det.bbox, self.config.padding, self.config.aspect());
        let pixels = sample_crop(frame, &region, width, height, self.config.mean, self.config.std);
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, height, width), pixels)
            .context("pose input buffer has the wrong size")?
            .into_tensor();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX pose inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != self.meta.num_keypoints {
            return Err(anyhow!(
                "expected heatmaps [1, {}, h, w], got {:?}",
                self.meta.num_keypoints,
                shape
            ));
        }
        let (channels, hm_h, hm_w) = (shape[1], shape[2], shape[3]);
        let data: Vec<f32> = view.iter().copied().collect();

        let (keypoints, scores) = decode_heatmaps(&data, channels, hm_h, hm_w, &region);
        let instance = PoseInstance::new(det, keypoints, scores);
        if self.output_heatmaps {
            Ok(instance.with_heatmap(Heatmap {
                channels,
                width: hm_w,
                height: hm_h,
                data,
                region,
            }))
        } else {
            Ok(instance)
        }
    }
}

impl PoseBackend for TractPoseEstimator {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn dataset_meta(&self) -> &DatasetMeta {
        &self.meta
    }

    fn estimate(&mut self, frame: &RgbImage, boxes: &[Detection]) -> Result<Vec<PoseInstance>> {
        boxes
            .iter()
            .map(|det| self.estimate_one(frame, det))
            .collect()
    }
}
