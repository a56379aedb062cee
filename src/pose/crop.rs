//! Top-down crop and heatmap decoding.
//!
//! Each detected box is expanded by a padding factor, widened or heightened
//! to the model's input aspect ratio, and sampled into a fixed-size input.
//! Heatmap peaks are then mapped back through the same region.

use image::RgbImage;

use crate::detect::BBox;

/// Expand `bbox` by `padding` around its center and fix its aspect ratio
/// (`width / height`) to `aspect`. The region may extend past the frame.
pub fn pose_region(bbox: &BBox, padding: f32, aspect: f32) -> BBox {
    let (cx, cy) = bbox.center();
    let mut w = bbox.width() * padding;
    let mut h = bbox.height() * padding;

    if w > h * aspect {
        h = w / aspect;
    } else {
        w = h * aspect;
    }

    BBox::from_center(cx, cy, w, h)
}

/// Sample `region` of `frame` into a normalized CHW buffer of
/// `3 x out_h x out_w`, using bilinear interpolation. Pixels outside the
/// frame are black before normalization.
pub fn sample_crop(
    frame: &RgbImage,
    region: &BBox,
    out_w: usize,
    out_h: usize,
    mean: [f32; 3],
    std: [f32; 3],
) -> Vec<f32> {
    let plane = out_w * out_h;
    let mut out = vec![0.0f32; 3 * plane];
    let sx = region.width() / out_w as f32;
    let sy = region.height() / out_h as f32;

    for y in 0..out_h {
        let fy = region.y1 + (y as f32 + 0.5) * sy - 0.5;
        for x in 0..out_w {
            let fx = region.x1 + (x as f32 + 0.5) * sx - 0.5;
            let rgb = bilinear(frame, fx, fy);
            for c in 0..3 {
                out[c * plane + y * out_w + x] = (rgb[c] - mean[c]) / std[c];
            }
        }
    }
    out
}

fn bilinear(frame: &RgbImage, fx: f32, fy: f32) -> [f32; 3] {
    let x0 = fx.floor();
    let y0 = fy.floor();
    let ax = fx - x0;
    let ay = fy - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let mut acc = [0.0f32; 3];
    for (dx, dy, weight) in [
        (0, 0, (1.0 - ax) * (1.0 - ay)),
        (1, 0, ax * (1.0 - ay)),
        (0, 1, (1.0 - ax) * ay),
        (1, 1, ax * ay),
    ] {
        if weight == 0.0 {
            continue;
        }
        let px = x0 + dx;
        let py = y0 + dy;
        if px < 0 || py < 0 || px >= frame.width() as i64 || py >= frame.height() as i64 {
            continue;
        }
        let pixel = frame.get_pixel(px as u32, py as u32);
        for c in 0..3 {
            acc[c] += weight * pixel[c] as f32;
        }
    }
    acc
}

/// Decode channel-major heatmaps (`channels x height x width`) into
/// keypoints in frame coordinates and their peak scores.
///
/// Peaks are refined by a quarter cell towards the higher neighbour.
pub fn decode_heatmaps(
    data: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    region: &BBox,
) -> (Vec<[f32; 2]>, Vec<f32>) {
    let plane = width * height;
    let mut keypoints = Vec::with_capacity(channels);
    let mut scores = Vec::with_capacity(channels);
    if plane == 0 {
        return (keypoints, scores);
    }

    for c in 0..channels {
        let map = &data[c * plane..(c + 1) * plane];
        let (best, score) = map
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |(bi, bv), (i, v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });

        let bx = best % width;
        let by = best / width;
        let mut px = bx as f32;
        let mut py = by as f32;
        if score > 0.0 {
            if bx > 0 && bx + 1 < width {
                let diff = map[by * width + bx + 1] - map[by * width + bx - 1];
                px += quarter_step(diff);
            }
            if by > 0 && by + 1 < height {
                let diff = map[(by + 1) * width + bx] - map[(by - 1) * width + bx];
                py += quarter_step(diff);
            }
        }

        keypoints.push([
            region.x1 + px * region.width() / width as f32,
            region.y1 + py * region.height() / height as f32,
        ]);
        scores.push(score);
    }
    (keypoints, scores)
}

fn quarter_step(diff: f32) -> f32 {
    if diff > 0.0 {
        0.25
    } else if diff < 0.0 {
        -0.25
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn region_widens_tall_boxes_to_aspect() {
        // 3:4 input (192x256), box 40x40 padded to 50x50
        let region = pose_region(&BBox::new(0.0, 0.0, 40.0, 40.0), 1.25, 0.75);
        assert!((region.height() - 50.0 / 0.75).abs() < 1e-4);
        assert!((region.width() - 50.0).abs() < 1e-4);
        assert_eq!(region.center(), (20.0, 20.0));
    }

    #[test]
    fn region_heightens_wide_boxes() {
        let region = pose_region(&BBox::new(0.0, 0.0, 100.0, 10.0), 1.0, 0.75);
        assert!((region.width() - 100.0).abs() < 1e-4);
        assert!((region.height() - 100.0 / 0.75).abs() < 1e-3);
    }

    #[test]
    fn crop_of_uniform_frame_is_uniform() {
        let frame = RgbImage::from_pixel(32, 32, Rgb([255, 0, 127]));
        let buf = sample_crop(
            &frame,
            &BBox::new(4.0, 4.0, 28.0, 28.0),
            8,
            8,
            [0.0; 3],
            [255.0; 3],
        );
        assert_eq!(buf.len(), 3 * 64);
        assert!(buf[..64].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(buf[64..128].iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn crop_outside_frame_is_black() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let buf = sample_crop(
            &frame,
            &BBox::new(100.0, 100.0, 110.0, 110.0),
            2,
            2,
            [10.0; 3],
            [1.0; 3],
        );
        assert!(buf.iter().all(|v| (*v + 10.0).abs() < 1e-5));
    }

    #[test]
    fn heatmap_peak_maps_into_region() {
        // one 4x4 channel, peak at (2, 1)
        let mut data = vec![0.0f32; 16];
        data[6] = 0.9;
        let region = BBox::new(100.0, 200.0, 140.0, 240.0);
        let (kps, scores) = decode_heatmaps(&data, 1, 4, 4, &region);
        assert_eq!(scores, vec![0.9]);
        assert!((kps[0][0] - 120.0).abs() < 1e-4);
        assert!((kps[0][1] - 210.0).abs() < 1e-4);
    }

    #[test]
    fn heatmap_peak_is_refined_towards_neighbour() {
        let mut data = vec![0.0f32; 16];
        data[5] = 0.8;
        data[6] = 0.4;
        let region = BBox::new(0.0, 0.0, 4.0, 4.0);
        let (kps, _) = decode_heatmaps(&data, 1, 4, 4, &region);
        assert!((kps[0][0] - 1.25).abs() < 1e-5);
        assert!((kps[0][1] - 1.0).abs() < 1e-5);
    }
}
