//! Top-down pose estimation.
//!
//! A pose backend receives the frame and the boxes kept after detection and
//! returns one keypoint instance per box, laid out by the model's
//! [`DatasetMeta`].

mod backend;
mod backends;
pub mod crop;
mod instance;
mod meta;

pub use backend::PoseBackend;
pub use backends::StubPoseEstimator;
#[cfg(feature = "backend-tract")]
pub use backends::TractPoseEstimator;
pub use instance::{Heatmap, PoseInstance, PredictedInstances};
pub use meta::{DatasetMeta, DatasetMetaFile};
