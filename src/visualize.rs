//! Pose rendering onto RGB frames.
//!
//! Skeleton links and keypoint discs are painted into an overlay first and
//! blended onto the frame once, so overlapping strokes keep a uniform
//! opacity. Boxes and index labels are drawn opaque on top.

use anyhow::{anyhow, Result};
use image::{imageops, Rgb, RgbImage};

use crate::config::{DrawSettings, SkeletonStyle};
use crate::detect::BBox;
use crate::pose::{DatasetMeta, PoseInstance, PredictedInstances};

const BBOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const LEFT_SHOULDER: usize = 5;
const RIGHT_SHOULDER: usize = 6;
/// Index of the synthetic neck point appended in openpose style.
const NECK: usize = 17;

const OPENPOSE_LINKS: [[usize; 2]; 17] = [
    [NECK, 0],
    [0, 1],
    [0, 2],
    [1, 3],
    [2, 4],
    [NECK, 5],
    [5, 7],
    [7, 9],
    [NECK, 6],
    [6, 8],
    [8, 10],
    [NECK, 11],
    [11, 13],
    [13, 15],
    [NECK, 12],
    [12, 14],
    [14, 16],
];

const OPENPOSE_PALETTE: [[u8; 3]; 18] = [
    [255, 0, 0],
    [255, 85, 0],
    [255, 170, 0],
    [255, 255, 0],
    [170, 255, 0],
    [85, 255, 0],
    [0, 255, 0],
    [0, 255, 85],
    [0, 255, 170],
    [0, 255, 255],
    [0, 170, 255],
    [0, 85, 255],
    [0, 0, 255],
    [85, 0, 255],
    [170, 0, 255],
    [255, 0, 255],
    [255, 0, 170],
    [255, 0, 85],
];

/// Draws predictions with fixed settings and dataset schema.
pub struct Visualizer {
    settings: DrawSettings,
    meta: DatasetMeta,
}

impl Visualizer {
    pub fn new(settings: DrawSettings, meta: DatasetMeta) -> Result<Self> {
        if settings.skeleton_style == SkeletonStyle::Openpose && !meta.is_coco_body() {
            return Err(anyhow!(
                "openpose skeleton style needs the COCO body schema, got {} with {} keypoints",
                meta.dataset_name,
                meta.num_keypoints
            ));
        }
        Ok(Self { settings, meta })
    }

    /// Render `instances` onto a copy of `frame`.
    ///
    /// With heatmaps enabled the result is twice as tall: the frame on top
    /// and the heatmap panel below.
    pub fn render(&self, frame: &RgbImage, instances: Option<&PredictedInstances>) -> RgbImage {
        let mut canvas = frame.clone();
        let mut overlay = Overlay::new(frame.width(), frame.height());

        for instance in instances.into_iter().flat_map(|preds| preds.iter()) {
            match self.settings.skeleton_style {
                SkeletonStyle::Mmpose => self.paint_mmpose(&mut overlay, instance),
                SkeletonStyle::Openpose => self.paint_openpose(&mut overlay, instance),
            }
        }
        overlay.blend_onto(&mut canvas, self.settings.alpha);

        for instance in instances.into_iter().flat_map(|preds| preds.iter()) {
            if self.settings.draw_bbox {
                draw_rectangle(&mut canvas, &instance.bbox, BBOX_COLOR);
            }
            if self.settings.show_kpt_idx {
                self.label_keypoints(&mut canvas, instance);
            }
        }

        if self.settings.draw_heatmap {
            let panel = heatmap_panel(frame.width(), frame.height(), instances);
            return stack_vertical(&canvas, &panel);
        }
        canvas
    }

    fn paint_mmpose(&self, overlay: &mut Overlay, instance: &PoseInstance) {
        let thr = self.settings.kpt_thr;
        for (link_idx, link) in self.meta.skeleton_links.iter().enumerate() {
            if let (Some(a), Some(b)) = (instance.visible(link[0], thr), instance.visible(link[1], thr)) {
                let color = self
                    .meta
                    .skeleton_link_colors
                    .get(link_idx)
                    .copied()
                    .unwrap_or([0, 255, 0]);
                overlay.line(a, b, self.settings.thickness, Rgb(color));
            }
        }
        for idx in 0..instance.num_keypoints() {
            if let Some(point) = instance.visible(idx, thr) {
                let color = self
                    .meta
                    .keypoint_colors
                    .get(idx)
                    .copied()
                    .unwrap_or([255, 128, 0]);
                overlay.disc(point, self.settings.radius, Rgb(color));
            }
        }
    }

    fn paint_openpose(&self, overlay: &mut Overlay, instance: &PoseInstance) {
        let points = openpose_points(instance, self.settings.kpt_thr);
        let thickness = self.settings.thickness * 2;
        for (link_idx, link) in OPENPOSE_LINKS.iter().enumerate() {
            if let (Some(a), Some(b)) = (points[link[0]], points[link[1]]) {
                overlay.line(a, b, thickness, Rgb(OPENPOSE_PALETTE[link_idx]));
            }
        }
        for (idx, point) in points.iter().enumerate() {
            if let Some(point) = point {
                overlay.disc(*point, self.settings.radius, Rgb(OPENPOSE_PALETTE[idx]));
            }
        }
    }

    fn label_keypoints(&self, canvas: &mut RgbImage, instance: &PoseInstance) {
        let offset = self.settings.radius as f32 + 1.0;
        for idx in 0..instance.num_keypoints() {
            if let Some([x, y]) = instance.visible(idx, self.settings.kpt_thr) {
                draw_label(
                    canvas,
                    (x + offset).round() as i32,
                    (y - offset).round() as i32 - GLYPH_HEIGHT,
                    &idx.to_string(),
                    LABEL_COLOR,
                );
            }
        }
    }
}

/// COCO keypoints plus the neck, each present only when visible.
fn openpose_points(instance: &PoseInstance, thr: f32) -> Vec<Option<[f32; 2]>> {
    let mut points: Vec<Option<[f32; 2]>> = (0..NECK).map(|idx| instance.visible(idx, thr)).collect();
    let neck = match (points[LEFT_SHOULDER], points[RIGHT_SHOULDER]) {
        (Some(l), Some(r)) => Some([(l[0] + r[0]) / 2.0, (l[1] + r[1]) / 2.0]),
        _ => None,
    };
    points.push(neck);
    points
}

/// Colour layer blended onto the frame in one pass.
struct Overlay {
    width: u32,
    height: u32,
    pixels: Vec<Option<Rgb<u8>>>,
}

impl Overlay {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![None; width as usize * height as usize],
        }
    }

    fn set(&mut self, x: i32, y: i32, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            self.pixels[y as usize * self.width as usize + x as usize] = Some(color);
        }
    }

    fn stamp(&mut self, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn disc(&mut self, center: [f32; 2], radius: u32, color: Rgb<u8>) {
        self.stamp(
            center[0].round() as i32,
            center[1].round() as i32,
            radius as i32,
            color,
        );
    }

    /// Bresenham line, widened by stamping a disc at each step.
    fn line(&mut self, from: [f32; 2], to: [f32; 2], thickness: u32, color: Rgb<u8>) {
        let (x0, y0) = (from[0].round() as i32, from[1].round() as i32);
        let (x1, y1) = (to[0].round() as i32, to[1].round() as i32);
        let half = (thickness.max(1) as i32 - 1) / 2;

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.stamp(x, y, half, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn blend_onto(&self, frame: &mut RgbImage, alpha: f32) {
        let alpha = alpha.clamp(0.0, 1.0);
        for (idx, color) in self.pixels.iter().enumerate() {
            let Some(color) = color else { continue };
            let x = (idx % self.width as usize) as u32;
            let y = (idx / self.width as usize) as u32;
            let pixel = frame.get_pixel_mut(x, y);
            for c in 0..3 {
                let mixed = alpha * color[c] as f32 + (1.0 - alpha) * pixel[c] as f32;
                pixel[c] = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn draw_rectangle(image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    let left = (bbox.x1.round() as i32).clamp(0, max_x);
    let right = (bbox.x2.round() as i32).clamp(0, max_x);
    let top = (bbox.y1.round() as i32).clamp(0, max_y);
    let bottom = (bbox.y2.round() as i32).clamp(0, max_y);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars() {
        if let Some(glyph) = digit_glyph(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_WIDTH + 1;
    }
}

fn digit_glyph(ch: char) -> Option<[u8; 7]> {
    match ch {
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        _ => None,
    }
}

/// Max-over-channels heatmap of every instance, resampled to frame size.
fn heatmap_panel(width: u32, height: u32, instances: Option<&PredictedInstances>) -> RgbImage {
    let mut values = vec![0.0f32; width as usize * height as usize];

    for heatmap in instances
        .into_iter()
        .flat_map(|preds| preds.iter())
        .filter_map(|instance| instance.heatmap.as_ref())
    {
        let region = heatmap.region;
        if region.width() <= 0.0 || region.height() <= 0.0 || heatmap.width == 0 || heatmap.height == 0 {
            continue;
        }
        let x_start = region.x1.floor().max(0.0) as u32;
        let y_start = region.y1.floor().max(0.0) as u32;
        let x_end = (region.x2.ceil().max(0.0) as u32).min(width);
        let y_end = (region.y2.ceil().max(0.0) as u32).min(height);

        for y in y_start..y_end {
            let hy = (((y as f32 + 0.5 - region.y1) / region.height()) * heatmap.height as f32) as isize;
            if hy < 0 || hy as usize >= heatmap.height {
                continue;
            }
            for x in x_start..x_end {
                let hx = (((x as f32 + 0.5 - region.x1) / region.width()) * heatmap.width as f32) as isize;
                if hx < 0 || hx as usize >= heatmap.width {
                    continue;
                }
                let value = heatmap.max_at(hx as usize, hy as usize);
                let slot = &mut values[y as usize * width as usize + x as usize];
                *slot = slot.max(value);
            }
        }
    }

    RgbImage::from_fn(width, height, |x, y| jet(values[y as usize * width as usize + x as usize]))
}

fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| ((1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

fn stack_vertical(top: &RgbImage, bottom: &RgbImage) -> RgbImage {
    let width = top.width().max(bottom.width());
    let mut out = RgbImage::new(width, top.height() + bottom.height());
    imageops::replace(&mut out, top, 0, 0);
    imageops::replace(&mut out, bottom, 0, top.height() as i64);
    out
}
