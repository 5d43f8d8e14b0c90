//! Detection-tracking fusion.
//!
//! The engine runs the detector every `detect_every` frames and a short-term
//! tracker on every frame in between. An accepted detection always re-anchors
//! the tracker; the track is dropped when the tracker loses the target or when
//! no detection has been accepted for `timeout_seconds` of virtual time.

mod engine;
mod state;

pub use engine::FusionEngine;
pub use state::{
    FusionReport, Presentation, ResetReason, Source, TargetState, Track, TrackedTarget,
};
