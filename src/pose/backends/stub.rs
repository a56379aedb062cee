use anyhow::Result;
use image::RgbImage;

use crate::detect::Detection;
use crate::pose::backend::PoseBackend;
use crate::pose::instance::{Heatmap, PoseInstance};
use crate::pose::meta::DatasetMeta;

const HEATMAP_WIDTH: usize = 12;
const HEATMAP_HEIGHT: usize = 16;
const GRID_COLUMNS: usize = 3;
const KEYPOINT_SCORE: f32 = 0.9;

/// Stub pose estimator for testing.
///
/// Lays the schema's keypoints out on a regular grid inside each box with a
/// fixed score, so results are deterministic for a given box.
pub struct StubPoseEstimator {
    meta: DatasetMeta,
    output_heatmaps: bool,
}

impl StubPoseEstimator {
    pub fn new(meta: DatasetMeta) -> Self {
        Self {
            meta,
            output_heatmaps: false,
        }
    }

    pub fn with_heatmaps(mut self, enabled: bool) -> Self {
        self.output_heatmaps = enabled;
        self
    }

    fn layout(&self, det: &Detection) -> Vec<[f32; 2]> {
        let count = self.meta.num_keypoints;
        let rows = count.div_ceil(GRID_COLUMNS);
        let bbox = det.bbox;
        (0..count)
            .map(|idx| {
                let col = (idx % GRID_COLUMNS) as f32 + 1.0;
                let row = (idx / GRID_COLUMNS) as f32 + 1.0;
                [
                    bbox.x1 + bbox.width() * col / (GRID_COLUMNS as f32 + 1.0),
                    bbox.y1 + bbox.height() * row / (rows as f32 + 1.0),
                ]
            })
            .collect()
    }

    fn heatmap_for(&self, det: &Detection, keypoints: &[[f32; 2]]) -> Heatmap {
        let bbox = det.bbox;
        let channels = keypoints.len();
        let mut data = vec![0.0f32; channels * HEATMAP_WIDTH * HEATMAP_HEIGHT];
        for (c, kp) in keypoints.iter().enumerate() {
            let hx = cell(kp[0] - bbox.x1, bbox.width(), HEATMAP_WIDTH);
            let hy = cell(kp[1] - bbox.y1, bbox.height(), HEATMAP_HEIGHT);
            data[(c * HEATMAP_HEIGHT + hy) * HEATMAP_WIDTH + hx] = KEYPOINT_SCORE;
        }
        Heatmap {
            channels,
            width: HEATMAP_WIDTH,
            height: HEATMAP_HEIGHT,
            data,
            region: bbox,
        }
    }
}

fn cell(offset: f32, extent: f32, cells: usize) -> usize {
    if extent <= 0.0 {
        return 0;
    }
    ((offset / extent * cells as f32) as usize).min(cells - 1)
}

impl Default for StubPoseEstimator {
    fn default() -> Self {
        Self::new(DatasetMeta::coco())
    }
}

impl PoseBackend for StubPoseEstimator {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn dataset_meta(&self) -> &DatasetMeta {
        &self.meta
    }

    fn estimate(&mut self, _frame: &RgbImage, boxes: &[Detection]) -> Result<Vec<PoseInstance>> {
        Ok(boxes
            .iter()
            .map(|det| {
                let keypoints = self.layout(det);
                let scores = vec![KEYPOINT_SCORE; keypoints.len()];
                let heatmap = self
                    .output_heatmaps
                    .then(|| self.heatmap_for(det, &keypoints));
                let instance = PoseInstance::new(det, keypoints, scores);
                match heatmap {
                    Some(heatmap) => instance.with_heatmap(heatmap),
                    None => instance,
                }
            })
            .collect())
    }
}
