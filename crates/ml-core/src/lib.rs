//! Detector and tracker capabilities consumed by the fusion engine.
//!
//! The crate only describes what a detector or a short-term tracker must do.
//! Concrete backends live next to the traits:
//! - `torch`: TorchScript YOLO-style detector (`with-tch`).
//! - `correlation`: built-in template tracker, always available.
//! - `opencv_backend`: CSRT/KCF trackers (`with-opencv`).

pub mod correlation;
pub mod detector;
pub mod geometry;
pub mod tracker;

#[cfg(feature = "with-opencv")]
mod opencv_backend;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use correlation::{CorrelationConfig, CorrelationTracker};
pub use detector::{Candidate, Detector, DetectorError, non_max_suppression, select_candidates};
pub use geometry::BoundingBox;
pub use tracker::{Tracker, TrackerBackend, TrackerError, TrackerFactory, TrackerKind};

#[cfg(feature = "with-tch")]
pub use tch;
