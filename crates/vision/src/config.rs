//! Fusion and aiming parameters.
//!
//! Both structs are built by the binary from CLI flags and validated once at
//! startup; the engine and the aim calculator never re-check them.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdRange { name: &'static str, value: f32 },
    #[error("redetect threshold {redetect} must not exceed initial threshold {initial}")]
    ThresholdOrder { initial: f32, redetect: f32 },
    #[error("at least one target label is required")]
    NoTargetLabels,
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("detect_every must be at least 1")]
    DetectCadence,
    #[error("{axis} servo limits are inconsistent: min {min}, center {center}, max {max}")]
    ServoLimits {
        axis: &'static str,
        min: i32,
        center: i32,
        max: i32,
    },
}

/// Detection-tracking fusion parameters.
#[derive(Clone, Debug)]
pub struct FusionConfig {
    /// Detector labels treated as targets. Matched case-insensitively.
    pub target_labels: Vec<String>,
    /// Minimum detector confidence to start tracking from Idle.
    pub initial_threshold: f32,
    /// Minimum detector confidence to re-anchor an active track.
    pub redetect_threshold: f32,
    /// The detector runs on every frame whose index is a multiple of this.
    pub detect_every: u64,
    /// Virtual seconds without an accepted detection before the track is dropped.
    pub timeout_seconds: f64,
    /// Frame rate assumed until enough frames have been measured.
    pub default_fps: f64,
    /// Tracker-only frames within this many seconds of a detection render as warm.
    pub warm_window: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            target_labels: vec!["Gun".to_string()],
            initial_threshold: 0.8,
            redetect_threshold: 0.6,
            detect_every: 10,
            timeout_seconds: 5.0,
            default_fps: 30.0,
            warm_window: 0.5,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_labels.iter().all(|label| label.trim().is_empty()) {
            return Err(ConfigError::NoTargetLabels);
        }
        for (name, value) in [
            ("initial threshold", self.initial_threshold),
            ("redetect threshold", self.redetect_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }
        if self.redetect_threshold > self.initial_threshold {
            return Err(ConfigError::ThresholdOrder {
                initial: self.initial_threshold,
                redetect: self.redetect_threshold,
            });
        }
        if self.detect_every == 0 {
            return Err(ConfigError::DetectCadence);
        }
        for (name, value) in [
            ("timeout_seconds", self.timeout_seconds),
            ("default_fps", self.default_fps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if !(self.warm_window.is_finite() && self.warm_window >= 0.0) {
            return Err(ConfigError::NotPositive {
                name: "warm_window",
                value: self.warm_window,
            });
        }
        Ok(())
    }

    pub fn is_target(&self, label: &str) -> bool {
        self.target_labels
            .iter()
            .any(|target| target.eq_ignore_ascii_case(label))
    }
}

/// Camera field of view in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldOfView {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Default for FieldOfView {
    fn default() -> Self {
        Self {
            horizontal: 78.0,
            vertical: 49.0,
        }
    }
}

/// Travel range of one servo axis, in whole degrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisLimits {
    pub min: i32,
    pub max: i32,
    /// Rest position and the angle that points at the frame center.
    pub center: i32,
}

impl Default for AxisLimits {
    fn default() -> Self {
        Self {
            min: 0,
            max: 180,
            center: 90,
        }
    }
}

impl AxisLimits {
    fn validate(&self, axis: &'static str) -> Result<(), ConfigError> {
        if self.min <= self.center && self.center <= self.max && self.min < self.max {
            Ok(())
        } else {
            Err(ConfigError::ServoLimits {
                axis,
                min: self.min,
                center: self.center,
                max: self.max,
            })
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AimConfig {
    pub fov: FieldOfView,
    pub pan: AxisLimits,
    pub tilt: AxisLimits,
}

impl AimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("horizontal fov", self.fov.horizontal),
            ("vertical fov", self.fov.vertical),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        self.pan.validate("pan")?;
        self.tilt.validate("tilt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(FusionConfig::default().validate(), Ok(()));
        assert_eq!(AimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn redetect_must_not_exceed_initial() {
        let config = FusionConfig {
            initial_threshold: 0.5,
            redetect_threshold: 0.7,
            ..FusionConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdOrder {
                initial: 0.5,
                redetect: 0.7
            })
        );
    }

    #[test]
    fn rejects_degenerate_values() {
        let zero_cadence = FusionConfig {
            detect_every: 0,
            ..FusionConfig::default()
        };
        assert_eq!(zero_cadence.validate(), Err(ConfigError::DetectCadence));

        let no_labels = FusionConfig {
            target_labels: vec![" ".to_string()],
            ..FusionConfig::default()
        };
        assert_eq!(no_labels.validate(), Err(ConfigError::NoTargetLabels));

        let bad_aim = AimConfig {
            pan: AxisLimits {
                min: 0,
                max: 180,
                center: 200,
            },
            ..AimConfig::default()
        };
        assert!(matches!(
            bad_aim.validate(),
            Err(ConfigError::ServoLimits { axis: "pan", .. })
        ));
    }

    #[test]
    fn label_matching_ignores_case() {
        let config = FusionConfig::default();
        assert!(config.is_target("gun"));
        assert!(config.is_target("GUN"));
        assert!(!config.is_target("knife"));
    }
}
