//! Minimal template tracker used when no OpenCV tracker is available.
//!
//! The target patch is sampled on a coarse grid (at most `max_samples` per
//! side), stored zero-mean, and searched for in a window around the previous
//! position with normalized cross-correlation. The search runs coarse-to-fine:
//! a strided pass over the whole window, then a unit-step pass around the best
//! coarse offset.

use image::{GrayImage, RgbImage, imageops};

use crate::{
    geometry::BoundingBox,
    tracker::{Tracker, TrackerError},
};

#[derive(Clone, Debug)]
pub struct CorrelationConfig {
    /// Maximum displacement searched per frame, in pixels.
    pub search_margin: i32,
    /// Peak correlation below which the target counts as lost.
    pub min_score: f32,
    /// Upper bound on template samples along each axis.
    pub max_samples: u32,
    /// Weight of the newest appearance when refreshing the template.
    pub template_blend: f32,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            search_margin: 24,
            min_score: 0.35,
            max_samples: 48,
            template_blend: 0.15,
        }
    }
}

struct Template {
    stride: u32,
    cols: u32,
    rows: u32,
    /// Zero-mean samples, row-major.
    values: Vec<f32>,
    norm: f32,
}

impl Template {
    fn sample(gray: &GrayImage, x0: i32, y0: i32, stride: u32, cols: u32, rows: u32) -> Option<Self> {
        let raw = sample_grid(gray, x0, y0, stride, cols, rows)?;
        let (values, norm) = zero_mean(raw);
        Some(Self {
            stride,
            cols,
            rows,
            values,
            norm,
        })
    }

    /// Normalized cross-correlation against the patch whose top-left sample is
    /// at `(x0, y0)`. Returns `None` when the patch leaves the frame.
    fn score_at(&self, gray: &GrayImage, x0: i32, y0: i32) -> Option<f32> {
        if !grid_fits(gray, x0, y0, self.stride, self.cols, self.rows) {
            return None;
        }
        let n = self.values.len() as f64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut cross = 0.0f64;
        let mut idx = 0;
        for row in 0..self.rows {
            let y = y0 as u32 + row * self.stride;
            for col in 0..self.cols {
                let x = x0 as u32 + col * self.stride;
                let value = gray.get_pixel(x, y).0[0] as f64;
                sum += value;
                sum_sq += value * value;
                cross += self.values[idx] as f64 * value;
                idx += 1;
            }
        }
        let variance = sum_sq - sum * sum / n;
        if variance <= f64::EPSILON || self.norm <= f32::EPSILON {
            return Some(0.0);
        }
        Some((cross / (self.norm as f64 * variance.sqrt())) as f32)
    }

    fn blend(&mut self, gray: &GrayImage, x0: i32, y0: i32, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let Some(raw) = sample_grid(gray, x0, y0, self.stride, self.cols, self.rows) else {
            return;
        };
        let (fresh, _) = zero_mean(raw);
        let mixed = self
            .values
            .iter()
            .zip(fresh)
            .map(|(old, new)| old * (1.0 - weight) + new * weight)
            .collect();
        let (values, norm) = zero_mean(mixed);
        self.values = values;
        self.norm = norm;
    }
}

/// Normalized cross-correlation tracker with a fixed-size box.
pub struct CorrelationTracker {
    config: CorrelationConfig,
    template: Option<Template>,
    bbox: Option<BoundingBox>,
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl CorrelationTracker {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            template: None,
            bbox: None,
        }
    }

    fn best_offset(&self, template: &Template, gray: &GrayImage, origin: (i32, i32)) -> Option<(i32, i32, f32)> {
        let margin = self.config.search_margin.max(0);
        let coarse_step = (template.stride as i32).max(2);
        let mut best: Option<(i32, i32, f32)> = None;
        let consider = |dx: i32, dy: i32, best: &mut Option<(i32, i32, f32)>| {
            if let Some(score) = template.score_at(gray, origin.0 + dx, origin.1 + dy) {
                if best.is_none_or(|(_, _, current)| score > current) {
                    *best = Some((dx, dy, score));
                }
            }
        };

        let mut dy = -margin;
        while dy <= margin {
            let mut dx = -margin;
            while dx <= margin {
                consider(dx, dy, &mut best);
                dx += coarse_step;
            }
            dy += coarse_step;
        }

        let (cx, cy, _) = best?;
        for fy in (cy - coarse_step + 1)..coarse_step + cy {
            for fx in (cx - coarse_step + 1)..coarse_step + cx {
                if fx.abs() <= margin && fy.abs() <= margin {
                    consider(fx, fy, &mut best);
                }
            }
        }
        best
    }
}

impl Tracker for CorrelationTracker {
    fn init(&mut self, frame: &RgbImage, bbox: BoundingBox) -> Result<(), TrackerError> {
        let (width, height) = frame.dimensions();
        let invalid = || TrackerError::InvalidBox {
            bbox,
            width,
            height,
        };
        let visible = bbox.clamp_to(width, height).ok_or_else(invalid)?;
        if visible.width() < 4 || visible.height() < 4 {
            return Err(invalid());
        }

        let longest = visible.width().max(visible.height()) as u32;
        let stride = longest.div_ceil(self.config.max_samples.max(1)).max(1);
        let cols = visible.width() as u32 / stride;
        let rows = visible.height() as u32 / stride;
        let gray = imageops::grayscale(frame);
        let template = Template::sample(&gray, visible.x1, visible.y1, stride, cols, rows)
            .ok_or_else(|| TrackerError::Backend("template sampling left the frame".to_string()))?;

        self.template = Some(template);
        self.bbox = Some(visible);
        Ok(())
    }

    fn update(&mut self, frame: &RgbImage) -> Option<BoundingBox> {
        let bbox = self.bbox?;
        let template = self.template.as_ref()?;
        let gray = imageops::grayscale(frame);
        let (dx, dy, score) = self.best_offset(template, &gray, (bbox.x1, bbox.y1))?;
        if score < self.config.min_score {
            self.bbox = None;
            self.template = None;
            return None;
        }

        let moved = bbox.translate(dx, dy);
        let blend = self.config.template_blend;
        if let Some(template) = self.template.as_mut() {
            template.blend(&gray, moved.x1, moved.y1, blend);
        }
        self.bbox = Some(moved);
        Some(moved)
    }
}

fn grid_fits(gray: &GrayImage, x0: i32, y0: i32, stride: u32, cols: u32, rows: u32) -> bool {
    if x0 < 0 || y0 < 0 || cols == 0 || rows == 0 {
        return false;
    }
    let last_x = x0 as u64 + (cols as u64 - 1) * stride as u64;
    let last_y = y0 as u64 + (rows as u64 - 1) * stride as u64;
    last_x < gray.width() as u64 && last_y < gray.height() as u64
}

fn sample_grid(gray: &GrayImage, x0: i32, y0: i32, stride: u32, cols: u32, rows: u32) -> Option<Vec<f32>> {
    if !grid_fits(gray, x0, y0, stride, cols, rows) {
        return None;
    }
    let mut values = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        let y = y0 as u32 + row * stride;
        for col in 0..cols {
            let x = x0 as u32 + col * stride;
            values.push(gray.get_pixel(x, y).0[0] as f32);
        }
    }
    Some(values)
}

fn zero_mean(mut values: Vec<f32>) -> (Vec<f32>, f32) {
    if values.is_empty() {
        return (values, 0.0);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let mut energy = 0.0f32;
    for value in values.iter_mut() {
        *value -= mean;
        energy += *value * *value;
    }
    (values, energy.sqrt())
}
