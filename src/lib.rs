//! Top-down pose estimation demo.
//!
//! A detector finds people in each frame; a pose estimator then predicts
//! keypoints inside every surviving box. Results can be rendered, shown in a
//! window and saved as images and JSON prediction documents.
//!
//! # Module Structure
//!
//! - `input`: classify `--input` and list the images to process
//! - `detect`: detector backends and box filtering (category, score, NMS)
//! - `pose`: pose backends, dataset keypoint schema, crop/heatmap helpers
//! - `pipeline`: one frame through detection, pose and rendering
//! - `visualize` / `display`: drawing and the live window
//! - `sink`: output path mapping and prediction documents
//! - `camera`: live frames for `--input webcam`
//! - `run`: engines, per-item isolation and the run summary
//! - `cli`: the `topdown_demo` command line

pub mod camera;
pub mod cli;
pub mod config;
pub mod detect;
pub mod display;
pub mod input;
pub mod model_config;
pub mod pipeline;
pub mod pose;
pub mod run;
pub mod sink;
pub mod ui;
pub mod visualize;

pub use config::{CameraSettings, DrawSettings, RunConfig, SkeletonStyle};
pub use detect::{BBox, Detection, DetectionResult, DetectorBackend};
pub use input::{classify_input, resolve_items, InputItem, InputKind};
pub use pipeline::{process_one_image, ImageOutcome};
pub use pose::{DatasetMeta, PoseBackend, PoseInstance, PredictedInstances};
pub use run::{build_engines, Engines, ItemFailure, ItemReport, ItemSuccess, RunSummary, Runner, Stage};
pub use sink::{
    checkpoint_name, ensure_dir, frame_target, output_paths, read_predictions, write_frame, write_predictions,
    OutputPaths, OutputRecord, ResultSink,
};
pub use visualize::Visualizer;
