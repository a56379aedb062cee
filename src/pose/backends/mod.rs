pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubPoseEstimator;

#[cfg(feature = "backend-tract")]
pub use tract::TractPoseEstimator;
