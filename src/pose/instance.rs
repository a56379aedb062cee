use crate::detect::{BBox, Detection};

/// Keypoint heatmaps for one instance.
///
/// `data` is channel-major: `channels` maps of `height` x `width` values,
/// covering `region` of the source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Heatmap {
    pub channels: usize,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub region: BBox,
}

impl Heatmap {
    pub fn value(&self, channel: usize, x: usize, y: usize) -> f32 {
        self.data[(channel * self.height + y) * self.width + x]
    }

    /// Maximum over all channels at one cell.
    pub fn max_at(&self, x: usize, y: usize) -> f32 {
        (0..self.channels)
            .map(|c| self.value(c, x, y))
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Pose estimate for one detected box.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseInstance {
    /// `(x, y)` per keypoint, in source-image pixels, in dataset order.
    pub keypoints: Vec<[f32; 2]>,
    pub keypoint_scores: Vec<f32>,
    pub bbox: BBox,
    pub bbox_score: f32,
    pub heatmap: Option<Heatmap>,
}

impl PoseInstance {
    pub fn new(detection: &Detection, keypoints: Vec<[f32; 2]>, keypoint_scores: Vec<f32>) -> Self {
        Self {
            keypoints,
            keypoint_scores,
            bbox: detection.bbox,
            bbox_score: detection.score,
            heatmap: None,
        }
    }

    pub fn with_heatmap(mut self, heatmap: Heatmap) -> Self {
        self.heatmap = Some(heatmap);
        self
    }

    pub fn num_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    /// Keypoint position unless its score is below `threshold`.
    pub fn visible(&self, idx: usize, threshold: f32) -> Option<[f32; 2]> {
        match (self.keypoints.get(idx), self.keypoint_scores.get(idx)) {
            (Some(kp), Some(&score)) if score >= threshold => Some(*kp),
            _ => None,
        }
    }
}

/// All pose instances predicted for one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredictedInstances {
    pub instances: Vec<PoseInstance>,
}

impl PredictedInstances {
    /// Merge per-box results. Returns `None` when nothing was estimated.
    pub fn merge(instances: Vec<PoseInstance>) -> Option<Self> {
        if instances.is_empty() {
            None
        } else {
            Some(Self { instances })
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PoseInstance> {
        self.instances.iter()
    }
}
