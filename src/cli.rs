//! topdown_demo - two-stage top-down pose estimation over images, folders,
//! pickled image lists or a live camera.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CameraSettings, DrawSettings, RunConfig, SkeletonStyle, DEFAULT_CAMERA_DEVICE, DEFAULT_DEVICE};
use crate::run;
use crate::ui::Ui;

#[derive(Parser, Debug)]
#[command(
    name = "topdown_demo",
    version,
    about = "Detect people, estimate their keypoints, and render or save the results"
)]
struct Args {
    /// Detector model config (TOML) or stub://NAME
    det_config: String,
    /// Detector checkpoint (ONNX) or stub://NAME
    det_checkpoint: String,
    /// Pose model config (TOML) or stub://NAME
    pose_config: String,
    /// Pose checkpoint (ONNX) or stub://NAME; its file stem names the output subdirectory
    pose_checkpoint: String,

    /// Image file, image folder, pickled image list (.pkl) or `webcam`
    #[arg(long, value_name = "PATH")]
    input: String,

    /// Root directory for rendered frames and prediction files
    #[arg(long, value_name = "DIR")]
    output_root: Option<PathBuf>,

    /// Write keypoint predictions as JSON
    #[arg(long)]
    save_predictions: bool,

    /// Inference device
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Detection category kept for pose estimation
    #[arg(long, default_value_t = 0)]
    det_cat_id: u32,

    /// Box score threshold
    #[arg(long, default_value_t = 0.3)]
    bbox_thr: f32,

    /// IoU threshold for box NMS
    #[arg(long, default_value_t = 0.3)]
    nms_thr: f32,

    /// Keypoint score threshold for drawing
    #[arg(long, default_value_t = 0.3)]
    kpt_thr: f32,

    /// Stack a heatmap panel under each rendered frame
    #[arg(long)]
    draw_heatmap: bool,

    /// Label keypoints with their index
    #[arg(long)]
    show_kpt_idx: bool,

    /// Skeleton drawing convention
    #[arg(long, value_enum, default_value_t = SkeletonStyle::Mmpose)]
    skeleton_style: SkeletonStyle,

    /// Keypoint disc radius in pixels
    #[arg(long, default_value_t = 3)]
    radius: u32,

    /// Skeleton link thickness in pixels
    #[arg(long, default_value_t = 1)]
    thickness: u32,

    /// Drawing opacity
    #[arg(long, default_value_t = 0.8)]
    alpha: f32,

    /// Draw instance bounding boxes
    #[arg(long)]
    draw_bbox: bool,

    /// Show frames in a window
    #[arg(long)]
    show: bool,

    /// Seconds each frame stays on screen (0 waits for a key press)
    #[arg(long, default_value_t = 0.0, value_name = "SECONDS")]
    show_interval: f64,

    /// Root joined to the `image` field of pickled records
    #[arg(long, env = "POSE_DATASET_ROOT", value_name = "DIR")]
    dataset_root: Option<PathBuf>,

    /// Camera device for `--input webcam`
    #[arg(long, default_value = DEFAULT_CAMERA_DEVICE, value_name = "DEVICE")]
    camera_device: String,

    /// Stop a webcam run after this many frames (0 = until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    max_frames: u64,

    /// Abort on the first item that fails
    #[arg(long)]
    fail_fast: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn into_run_config(self) -> Result<RunConfig> {
        let show_interval = Duration::try_from_secs_f64(self.show_interval)
            .map_err(|_| anyhow!("--show-interval must be a non-negative number of seconds"))?;

        let mut cfg = RunConfig::new(
            self.det_config,
            self.det_checkpoint,
            self.pose_config,
            self.pose_checkpoint,
            self.input,
        );
        cfg.output_root = self.output_root;
        cfg.save_predictions = self.save_predictions;
        cfg.device = self.device;
        cfg.det_cat_id = self.det_cat_id;
        cfg.bbox_thr = self.bbox_thr;
        cfg.nms_thr = self.nms_thr;
        cfg.draw = DrawSettings {
            draw_heatmap: self.draw_heatmap,
            draw_bbox: self.draw_bbox,
            show_kpt_idx: self.show_kpt_idx,
            skeleton_style: self.skeleton_style,
            radius: self.radius,
            thickness: self.thickness,
            alpha: self.alpha,
            kpt_thr: self.kpt_thr,
        };
        cfg.show = self.show;
        cfg.show_interval = show_interval;
        cfg.dataset_root = self.dataset_root.filter(|root| !root.as_os_str().is_empty());
        cfg.camera = CameraSettings {
            device: self.camera_device,
            max_frames: self.max_frames,
        };
        cfg.fail_fast = self.fail_fast;
        Ok(cfg)
    }
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = args.into_run_config()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| anyhow!("failed to install Ctrl-C handler: {}", err))?;

    let summary = run::run(cfg, ui, stop)?;
    println!("topdown_demo: {}", summary);

    if summary.is_success() {
        Ok(())
    } else {
        Err(anyhow!("{} item(s) failed", summary.failures.len()))
    }
}
