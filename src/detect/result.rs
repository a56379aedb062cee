use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from its center and size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One candidate box produced by a detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub score: f32,
    /// Category id in the detector's label space.
    pub label: u32,
}

impl Detection {
    pub fn new(bbox: BBox, score: f32, label: u32) -> Self {
        Self { bbox, score, label }
    }
}

/// Result of running detection on a frame.
///
/// Detections are kept in the order the backend produced them.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_from_center_round_trips_geometry() {
        let bbox = BBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(bbox, BBox::new(40.0, 35.0, 60.0, 45.0));
        assert_eq!(bbox.center(), (50.0, 40.0));
        assert_eq!(bbox.area(), 200.0);
    }

    #[test]
    fn degenerate_bbox_has_zero_area() {
        let bbox = BBox::new(10.0, 10.0, 5.0, 20.0);
        assert_eq!(bbox.width(), 0.0);
        assert_eq!(bbox.area(), 0.0);
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let bbox = BBox::new(-5.0, 2.0, 700.0, 500.0).clamp_to(640, 480);
        assert_eq!(bbox, BBox::new(0.0, 2.0, 640.0, 480.0));
    }
}
