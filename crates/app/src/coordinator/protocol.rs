//! JSON messages sent to display consumers and producers.

use serde::Serialize;
use vision::{FusionReport, Presentation, TrackedTarget};

#[derive(Debug, Serialize)]
pub struct DisplayMessage {
    /// Base64 annotated JPEG.
    pub frame: String,
    pub detections: Vec<DetectionReport>,
    pub weapon_detected: bool,
    /// Echo of the producer timestamp.
    pub timestamp: f64,
    pub tracking_active: bool,
}

#[derive(Debug, Serialize)]
pub struct DetectionReport {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoxCorners,
    pub center: Point,
    pub source: &'static str,
    pub time_since_last_detection: f64,
}

#[derive(Debug, Serialize)]
pub struct BoxCorners {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerAck {
    pub status: &'static str,
    pub detection_count: usize,
    pub weapon_detected: bool,
    pub tracking_active: bool,
}

impl DetectionReport {
    pub fn from_target(target: &TrackedTarget) -> Self {
        // Reconfirmed frames report the detector, everything else the tracker.
        let source = match target.presentation {
            Presentation::Reconfirmed => "detector",
            Presentation::Warm | Presentation::Cooling { .. } => "tracker",
        };
        Self {
            class: target.class.clone(),
            confidence: target.confidence,
            bbox: BoxCorners {
                x1: target.bbox.x1,
                y1: target.bbox.y1,
                x2: target.bbox.x2,
                y2: target.bbox.y2,
            },
            center: Point {
                x: target.center.0,
                y: target.center.1,
            },
            source,
            time_since_last_detection: target.time_since_detection,
        }
    }
}

/// Detections listed for one processed frame.
pub fn detections(report: &FusionReport) -> Vec<DetectionReport> {
    report
        .target
        .iter()
        .map(DetectionReport::from_target)
        .collect()
}

impl ProducerAck {
    pub fn processed(report: &FusionReport) -> Self {
        let detection_count = usize::from(report.target.is_some());
        Self {
            status: "processed",
            detection_count,
            weapon_detected: detection_count > 0,
            tracking_active: report.tracking_active(),
        }
    }
}
