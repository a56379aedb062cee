//! Person detection.
//!
//! A detector backend turns one RGB frame into scored, labelled boxes. The
//! pipeline then keeps the configured category above the score threshold and
//! reduces overlapping boxes with [`nms`].

mod backend;
mod backends;
mod filter;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use filter::{filter_by_category, iou, nms, select_boxes};
pub use result::{BBox, Detection, DetectionResult};
