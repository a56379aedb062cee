//! Model config files.
//!
//! Each engine is described by a small TOML file next to its checkpoint.
//! `stub://` paths select the built-in defaults without touching disk.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::pose::{DatasetMeta, DatasetMetaFile};

const IMAGENET_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const IMAGENET_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Output tensor layout of a detection model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorOutput {
    /// `[1, 4 + classes, anchors]`: cx, cy, w, h then one score per class.
    #[default]
    Yolov8,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorModelConfig {
    #[serde(default = "default_det_size")]
    pub input_width: u32,
    #[serde(default = "default_det_size")]
    pub input_height: u32,
    #[serde(default)]
    pub output: DetectorOutput,
    /// Expected class count; checked against the output tensor when set.
    #[serde(default)]
    pub num_classes: Option<usize>,
    /// Candidates at or below this score are dropped before the pipeline
    /// filters them.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoseModelConfig {
    #[serde(default = "default_pose_width")]
    pub input_width: u32,
    #[serde(default = "default_pose_height")]
    pub input_height: u32,
    /// Box expansion factor applied before cropping.
    #[serde(default = "default_padding")]
    pub padding: f32,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    pub dataset: Option<DatasetMetaFile>,
}

fn default_det_size() -> u32 { 640 }
fn default_score_floor() -> f32 { 0.01 }
fn default_pose_width() -> u32 { 192 }
fn default_pose_height() -> u32 { 256 }
fn default_padding() -> f32 { 1.25 }
fn default_mean() -> [f32; 3] { IMAGENET_MEAN }
fn default_std() -> [f32; 3] { IMAGENET_STD }

impl Default for DetectorModelConfig {
    fn default() -> Self {
        Self {
            input_width: default_det_size(),
            input_height: default_det_size(),
            output: DetectorOutput::default(),
            num_classes: None,
            score_floor: default_score_floor(),
        }
    }
}

impl Default for PoseModelConfig {
    fn default() -> Self {
        Self {
            input_width: default_pose_width(),
            input_height: default_pose_height(),
            padding: default_padding(),
            mean: default_mean(),
            std: default_std(),
            dataset: None,
        }
    }
}

impl DetectorModelConfig {
    pub fn load(path: &str) -> Result<Self> {
        if is_stub(path) {
            return Ok(Self::default());
        }
        let cfg: Self = read_toml(Path::new(path))?;
        if cfg.input_width == 0 || cfg.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero in {}", path));
        }
        if cfg.num_classes == Some(0) {
            return Err(anyhow!("detector num_classes must be non-zero in {}", path));
        }
        Ok(cfg)
    }
}

impl PoseModelConfig {
    pub fn load(path: &str) -> Result<Self> {
        if is_stub(path) {
            return Ok(Self::default());
        }
        let cfg: Self = read_toml(Path::new(path))?;
        if cfg.input_width == 0 || cfg.input_height == 0 {
            return Err(anyhow!("pose input size must be non-zero in {}", path));
        }
        if cfg.padding <= 0.0 {
            return Err(anyhow!("pose padding must be positive in {}", path));
        }
        if cfg.std.iter().any(|s| *s == 0.0) {
            return Err(anyhow!("pose std must not contain zero in {}", path));
        }
        Ok(cfg)
    }

    /// Keypoint schema, defaulting to COCO body.
    pub fn dataset_meta(&self) -> Result<DatasetMeta> {
        match &self.dataset {
            Some(file) => DatasetMeta::from_file(file.clone()),
            None => Ok(DatasetMeta::coco()),
        }
    }

    /// Model input aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.input_width as f32 / self.input_height as f32
    }
}

/// True for `stub://` engine paths.
pub fn is_stub(path: &str) -> bool {
    path.starts_with("stub://")
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid model config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn stub_paths_use_defaults() {
        let det = DetectorModelConfig::load("stub://detector").unwrap();
        assert_eq!(det.input_width, 640);
        let pose = PoseModelConfig::load("stub://pose").unwrap();
        assert_eq!((pose.input_width, pose.input_height), (192, 256));
        assert_eq!(pose.dataset_meta().unwrap().num_keypoints, 17);
    }

    #[test]
    fn pose_config_with_custom_dataset() {
        let file = write(
            r#"
            input_width = 256
            input_height = 256
            padding = 1.1

            [dataset]
            name = "face5"
            keypoint_names = ["l_eye", "r_eye", "nose", "l_mouth", "r_mouth"]
            skeleton_links = [[0, 1], [3, 4]]
            "#,
        );
        let cfg = PoseModelConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.aspect(), 1.0);
        assert_eq!(cfg.padding, 1.1);
        assert_eq!(cfg.mean, IMAGENET_MEAN);
        let meta = cfg.dataset_meta().unwrap();
        assert_eq!(meta.dataset_name, "face5");
        assert_eq!(meta.num_keypoints, 5);
    }

    #[test]
    fn detector_config_rejects_unknown_keys() {
        let file = write("input_width = 320\nanchors = 3\n");
        let err = DetectorModelConfig::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid model config"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(PoseModelConfig::load("/nonexistent/pose.toml").is_err());
    }
}
