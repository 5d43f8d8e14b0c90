use image::RgbImage;
use thiserror::Error;

use crate::geometry::BoundingBox;

/// Single detection proposed by a detector for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Candidate {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector backend unavailable: {0}")]
    Unavailable(String),
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected detector output shape: {0:?}")]
    OutputShape(Vec<i64>),
}

/// Object detector capability.
///
/// Implementations return every candidate whose confidence reaches
/// `threshold`; label filtering and best-candidate selection are left to the
/// caller.
pub trait Detector: Send {
    fn infer(&mut self, frame: &RgbImage, threshold: f32) -> Result<Vec<Candidate>, DetectorError>;

    /// Backend name used in logs and health reports.
    fn name(&self) -> &str;
}

/// Greedy per-label non-maximum suppression. Output is ordered by descending
/// confidence.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|existing| {
            existing.label == candidate.label && existing.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Suppress overlaps across every proposal, then keep at most `limit` of the
/// strongest survivors.
pub fn select_candidates(
    candidates: Vec<Candidate>,
    iou_threshold: f32,
    limit: usize,
) -> Vec<Candidate> {
    let mut kept = non_max_suppression(candidates, iou_threshold);
    kept.truncate(limit);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(label: &str, confidence: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Candidate {
        Candidate::new(label, confidence, BoundingBox::new(x1, y1, x2, y2).unwrap())
    }

    #[test]
    fn nms_keeps_strongest_overlapping_box() {
        let kept = non_max_suppression(
            vec![
                candidate("Gun", 0.70, 10, 10, 110, 110),
                candidate("Gun", 0.90, 12, 12, 112, 112),
                candidate("Gun", 0.60, 300, 300, 360, 360),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.90);
        assert_eq!(kept[1].confidence, 0.60);
    }

    #[test]
    fn nms_does_not_suppress_across_labels() {
        let kept = non_max_suppression(
            vec![
                candidate("Gun", 0.90, 10, 10, 110, 110),
                candidate("Knife", 0.80, 10, 10, 110, 110),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn late_strong_proposal_survives_the_candidate_limit() {
        let mut proposals: Vec<Candidate> = (0..8)
            .map(|i| candidate("Gun", 0.3 + i as f32 * 0.01, i * 50, 0, i * 50 + 20, 20))
            .collect();
        proposals.push(candidate("Gun", 0.95, 0, 100, 40, 140));

        let kept = select_candidates(proposals, 0.45, 3);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.95);
        assert!(kept[1].confidence > kept[2].confidence);
        assert_eq!(kept[1].bbox, BoundingBox::new(350, 0, 370, 20).unwrap());
    }
}
