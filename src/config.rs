use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "cpu";
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_THRESHOLD: f32 = 0.3;

/// Keypoint/link drawing convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SkeletonStyle {
    #[default]
    Mmpose,
    Openpose,
}

/// Rendering options shared by the visualizer and the display window.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawSettings {
    pub draw_heatmap: bool,
    pub draw_bbox: bool,
    pub show_kpt_idx: bool,
    pub skeleton_style: SkeletonStyle,
    pub radius: u32,
    pub thickness: u32,
    pub alpha: f32,
    pub kpt_thr: f32,
}

impl Default for DrawSettings {
    fn default() -> Self {
        Self {
            draw_heatmap: false,
            draw_bbox: false,
            show_kpt_idx: false,
            skeleton_style: SkeletonStyle::Mmpose,
            radius: 3,
            thickness: 1,
            alpha: 0.8,
            kpt_thr: DEFAULT_THRESHOLD,
        }
    }
}

/// Live camera options for `--input webcam`.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    pub device: String,
    /// Stop after this many frames; 0 runs until interrupted.
    pub max_frames: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            max_frames: 0,
        }
    }
}

/// Immutable snapshot of a run's configuration.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub det_config: String,
    pub det_checkpoint: String,
    pub pose_config: String,
    pub pose_checkpoint: String,
    pub input: String,
    pub output_root: Option<PathBuf>,
    pub save_predictions: bool,
    pub device: String,
    pub det_cat_id: u32,
    pub bbox_thr: f32,
    pub nms_thr: f32,
    pub draw: DrawSettings,
    pub show: bool,
    pub show_interval: Duration,
    /// Root joined to the `image` field of pickled records.
    pub dataset_root: Option<PathBuf>,
    pub camera: CameraSettings,
    pub fail_fast: bool,
}

impl RunConfig {
    /// Config with the given engines and input and every option at its
    /// default.
    pub fn new(
        det_config: impl Into<String>,
        det_checkpoint: impl Into<String>,
        pose_config: impl Into<String>,
        pose_checkpoint: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            det_config: det_config.into(),
            det_checkpoint: det_checkpoint.into(),
            pose_config: pose_config.into(),
            pose_checkpoint: pose_checkpoint.into(),
            input: input.into(),
            output_root: None,
            save_predictions: false,
            device: DEFAULT_DEVICE.to_string(),
            det_cat_id: 0,
            bbox_thr: DEFAULT_THRESHOLD,
            nms_thr: DEFAULT_THRESHOLD,
            draw: DrawSettings::default(),
            show: false,
            show_interval: Duration::ZERO,
            dataset_root: None,
            camera: CameraSettings::default(),
            fail_fast: false,
        }
    }

    /// Whether any frame needs rendering.
    pub fn wants_rendering(&self) -> bool {
        self.show || self.output_root.is_some()
    }

    /// Check preconditions before any engine is built.
    pub fn validate(&self) -> Result<()> {
        if !self.show && self.output_root.is_none() {
            return Err(anyhow!(
                "nothing to do: pass --show and/or --output-root"
            ));
        }
        for (name, value) in [
            ("input", &self.input),
            ("det_config", &self.det_config),
            ("det_checkpoint", &self.det_checkpoint),
            ("pose_config", &self.pose_config),
            ("pose_checkpoint", &self.pose_checkpoint),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{} must not be empty", name));
            }
        }
        if self.save_predictions && self.output_root.is_none() {
            return Err(anyhow!("--save-predictions requires --output-root"));
        }
        if let Some(root) = &self.output_root {
            if root.as_os_str().is_empty() {
                return Err(anyhow!("--output-root must not be empty"));
            }
        }
        for (name, value) in [
            ("bbox_thr", self.bbox_thr),
            ("nms_thr", self.nms_thr),
            ("kpt_thr", self.draw.kpt_thr),
            ("alpha", self.draw.alpha),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        let mut cfg = RunConfig::new(
            "det.toml",
            "det.onnx",
            "pose.toml",
            "pose.onnx",
            "img.jpg",
        );
        cfg.output_root = Some(PathBuf::from("out"));
        cfg
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let cfg = base();
        assert_eq!(cfg.bbox_thr, 0.3);
        assert_eq!(cfg.nms_thr, 0.3);
        assert_eq!(cfg.draw.kpt_thr, 0.3);
        assert_eq!(cfg.draw.radius, 3);
        assert_eq!(cfg.draw.thickness, 1);
        assert_eq!(cfg.draw.alpha, 0.8);
        assert_eq!(cfg.device, "cpu");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn requires_show_or_output_root() {
        let mut cfg = base();
        cfg.output_root = None;
        assert!(cfg.validate().is_err());
        cfg.show = true;
        assert!(cfg.validate().is_ok());
        assert!(cfg.wants_rendering());
    }

    #[test]
    fn rejects_empty_paths() {
        let mut cfg = base();
        cfg.input = String::new();
        assert!(cfg.validate().unwrap_err().to_string().contains("input"));

        let mut cfg = base();
        cfg.pose_checkpoint = "  ".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("pose_checkpoint"));
    }

    #[test]
    fn save_predictions_needs_output_root() {
        let mut cfg = base();
        cfg.output_root = None;
        cfg.show = true;
        cfg.save_predictions = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn thresholds_must_be_probabilities() {
        let mut cfg = base();
        cfg.bbox_thr = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.draw.alpha = -0.1;
        assert!(cfg.validate().is_err());
    }
}
