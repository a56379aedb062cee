#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection, DetectionResult};
use crate::model_config::{DetectorModelConfig, DetectorOutput};

/// Tract-based detector for ONNX models.
///
/// Frames are resized to the model input, scaled to 0..1 and fed as
/// `[1, 3, H, W]`. Boxes are mapped back to frame pixels.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    config: DetectorModelConfig,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, config: DetectorModelConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
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

        Ok(Self { model, config })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let width = self.config.input_width;
        let height = self.config.input_height;
        let resized = imageops::resize(frame, width, height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode_yolov8(&self, outputs: TVec<TValue>, frame: &RgbImage) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!(
                "expected detector output [1, 4 + classes, anchors], got {:?}",
                shape
            ));
        }
        let classes = shape[1] - 4;
        if let Some(expected) = self.config.num_classes {
            if expected != classes {
                return Err(anyhow!(
                    "detector output has {} classes, config expects {}",
                    classes,
                    expected
                ));
            }
        }
        let anchors = shape[2];

        let scale_x = frame.width() as f32 / self.config.input_width as f32;
        let scale_y = frame.height() as f32 / self.config.input_height as f32;

        let mut detections = Vec::new();
        for i in 0..anchors {
            let (label, score) = (0..classes)
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score <= self.config.score_floor {
                continue;
            }
            let cx = view[[0, 0, i]] * scale_x;
            let cy = view[[0, 1, i]] * scale_y;
            let w = view[[0, 2, i]] * scale_x;
            let h = view[[0, 3, i]] * scale_y;
            detections.push(Detection::new(
                BBox::from_center(cx, cy, w, h).clamp_to(frame.width(), frame.height()),
                score,
                label as u32,
            ));
        }
        Ok(DetectionResult::new(detections))
    }
}

impl DetectorBackend for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX detector inference failed")?;
        match self.config.output {
            DetectorOutput::Yolov8 => self.decode_yolov8(outputs, frame),
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.config.input_width, self.config.input_height);
        self.detect(&blank).map(|_| ())
    }
}
