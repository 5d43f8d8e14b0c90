//! Target acquisition for the pan/tilt server: fusion of detector and tracker
//! output, the virtual clock behind the detection timeout, servo aiming and
//! the display overlay.

pub mod aim;
pub mod annotation;
pub mod clock;
pub mod config;
pub mod fusion;

pub use aim::{AimCalculator, FrameGeometry, ServoAngles, angles_for, select_target};
pub use annotation::annotate;
pub use clock::FpsEstimator;
pub use config::{AimConfig, AxisLimits, ConfigError, FieldOfView, FusionConfig};
pub use fusion::{
    FusionEngine, FusionReport, Presentation, ResetReason, Source, TargetState, Track,
    TrackedTarget,
};
