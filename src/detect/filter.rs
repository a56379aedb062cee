use super::result::{BBox, Detection, DetectionResult};

/// Keep detections of `category` whose score is strictly above `score_thr`.
pub fn filter_by_category(result: &DetectionResult, category: u32, score_thr: f32) -> Vec<Detection> {
    result
        .detections
        .iter()
        .filter(|det| det.label == category && det.score > score_thr)
        .copied()
        .collect()
}

/// Intersection over union of two boxes. Empty unions yield 0.
///
/// Coordinates are continuous: widths are `x2 - x1` with no `+ 1` pixel
/// term. Overlaps therefore score lower than under the pixel-inclusive IoU
/// of mmpose's `nms`, most visibly on small boxes.
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-max suppression.
///
/// Returns the indices of kept detections, highest score first. A box is
/// dropped when its IoU with an already kept box exceeds `iou_thr`. Equal
/// scores keep their input order.
pub fn nms(detections: &[Detection], iou_thr: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| detections[b].score.total_cmp(&detections[a].score));

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for idx in order {
        let suppressed = keep
            .iter()
            .any(|&kept| iou(&detections[kept].bbox, &detections[idx].bbox) > iou_thr);
        if !suppressed {
            keep.push(idx);
        }
    }
    keep
}

/// Category filter followed by NMS: the boxes handed to the pose estimator.
pub fn select_boxes(
    result: &DetectionResult,
    category: u32,
    score_thr: f32,
    iou_thr: f32,
) -> Vec<Detection> {
    let candidates = filter_by_category(result, category, score_thr);
    nms(&candidates, iou_thr)
        .into_iter()
        .map(|idx| candidates[idx])
        .collect()
}
