//! Pan/tilt angles from a target box.

use std::fmt;

use ml_core::{BoundingBox, Candidate};

use crate::config::{AimConfig, AxisLimits, FieldOfView};

/// Servo command in whole degrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServoAngles {
    pub x_angle: i32,
    pub y_angle: i32,
}

impl ServoAngles {
    pub fn rest(config: &AimConfig) -> Self {
        Self {
            x_angle: config.pan.center,
            y_angle: config.tilt.center,
        }
    }
}

/// Wire form sent to servo consumers: `"<x>,<y>"`.
impl fmt::Display for ServoAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x_angle, self.y_angle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Largest-area candidate. Ties keep the first.
pub fn select_target(candidates: &[Candidate]) -> Option<&Candidate> {
    let mut best: Option<&Candidate> = None;
    for candidate in candidates {
        if best.is_none_or(|current| candidate.bbox.area() > current.bbox.area()) {
            best = Some(candidate);
        }
    }
    best
}

/// Point the servos at the center of `bbox`.
///
/// The center is normalized to `[-0.5, 0.5]` of the frame and scaled by the
/// field of view. The pan offset is inverted, the tilt offset is not. Each
/// axis is clamped to its limits and rounded half away from zero.
pub fn angles_for(
    bbox: &BoundingBox,
    geometry: FrameGeometry,
    fov: FieldOfView,
    pan: AxisLimits,
    tilt: AxisLimits,
) -> ServoAngles {
    let (cx, cy) = bbox.center_f64();
    let offset_x = cx / geometry.width.max(1) as f64 - 0.5;
    let offset_y = cy / geometry.height.max(1) as f64 - 0.5;

    let x = pan.center as f64 - offset_x * fov.horizontal;
    let y = tilt.center as f64 + offset_y * fov.vertical;
    ServoAngles {
        x_angle: clamp_round(x, pan),
        y_angle: clamp_round(y, tilt),
    }
}

fn clamp_round(angle: f64, limits: AxisLimits) -> i32 {
    angle
        .clamp(limits.min as f64, limits.max as f64)
        .round() as i32
}

/// Maps target boxes to servo commands and remembers the last one.
#[derive(Debug, Clone)]
pub struct AimCalculator {
    config: AimConfig,
    last: Option<ServoAngles>,
}

impl AimCalculator {
    pub fn new(config: AimConfig) -> Self {
        Self { config, last: None }
    }

    pub fn rest(&self) -> ServoAngles {
        ServoAngles::rest(&self.config)
    }

    /// Aim at the largest candidate, or return the rest position when there is
    /// none.
    pub fn command(&mut self, candidates: &[Candidate], geometry: FrameGeometry) -> ServoAngles {
        match select_target(candidates) {
            Some(target) => self.aim_at(&target.bbox, geometry),
            None => self.rest(),
        }
    }

    /// Aim at a known box and remember the result.
    pub fn aim_at(&mut self, bbox: &BoundingBox, geometry: FrameGeometry) -> ServoAngles {
        let angles = angles_for(bbox, geometry, self.config.fov, self.config.pan, self.config.tilt);
        self.last = Some(angles);
        angles
    }

    /// Last angles computed for a real target.
    pub fn last_angles(&self) -> Option<ServoAngles> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VGA: FrameGeometry = FrameGeometry {
        width: 640,
        height: 480,
    };

    fn candidate(x: i32, y: i32, w: i32, h: i32) -> Candidate {
        Candidate::new("Gun", 0.9, BoundingBox::from_xywh(x, y, w, h).unwrap())
    }

    #[test]
    fn picks_the_largest_box() {
        let small = candidate(0, 0, 80, 60);
        let large = candidate(300, 200, 150, 100);
        assert_eq!(small.bbox.area(), 4800);
        assert_eq!(large.bbox.area(), 15000);

        let candidates = [small, large.clone()];
        assert_eq!(select_target(&candidates), Some(&large));
        assert_eq!(select_target(&[]), None);
    }

    #[test]
    fn equal_areas_keep_the_first() {
        let first = candidate(0, 0, 10, 10);
        let second = candidate(50, 50, 10, 10);
        let candidates = [first.clone(), second];
        assert_eq!(select_target(&candidates), Some(&first));
    }

    #[test]
    fn centered_box_points_straight_ahead() {
        let bbox = BoundingBox::new(300, 220, 340, 260).unwrap();
        let config = AimConfig::default();
        let angles = angles_for(&bbox, VGA, config.fov, config.pan, config.tilt);
        assert_eq!(angles, ServoAngles { x_angle: 90, y_angle: 90 });
        assert_eq!(angles.to_string(), "90,90");
    }

    #[test]
    fn offsets_follow_the_field_of_view() {
        // Center at (480, 120): a quarter frame right and up.
        let bbox = BoundingBox::new(460, 100, 500, 140).unwrap();
        let config = AimConfig::default();
        let angles = angles_for(&bbox, VGA, config.fov, config.pan, config.tilt);
        // 90 - 0.25 * 78 = 70.5 and 90 - 0.25 * 49 = 77.75
        assert_eq!(angles, ServoAngles { x_angle: 71, y_angle: 78 });
    }

    #[test]
    fn angles_are_clamped_to_servo_limits() {
        let config = AimConfig {
            fov: FieldOfView {
                horizontal: 400.0,
                vertical: 400.0,
            },
            ..AimConfig::default()
        };
        let corner = BoundingBox::new(0, 0, 2, 2).unwrap();
        let angles = angles_for(&corner, VGA, config.fov, config.pan, config.tilt);
        assert_eq!(angles, ServoAngles { x_angle: 180, y_angle: 0 });

        let far_corner = BoundingBox::new(638, 478, 640, 480).unwrap();
        let angles = angles_for(&far_corner, VGA, config.fov, config.pan, config.tilt);
        assert_eq!(angles, ServoAngles { x_angle: 0, y_angle: 180 });
    }

    #[test]
    fn left_edge_target_with_default_fov_stays_in_range() {
        let config = AimConfig::default();
        let left_edge = BoundingBox::new(-10, 220, 10, 260).unwrap();
        let angles = angles_for(&left_edge, VGA, config.fov, config.pan, config.tilt);
        // 90 + 0.5 * 78
        assert_eq!(angles, ServoAngles { x_angle: 129, y_angle: 90 });
    }

    #[test]
    fn no_target_commands_rest_not_last_angles() {
        let mut aim = AimCalculator::new(AimConfig::default());
        let moved = aim.command(&[candidate(0, 0, 40, 40)], VGA);
        assert_ne!(moved, aim.rest());
        assert_eq!(aim.last_angles(), Some(moved));

        let idle = aim.command(&[], VGA);
        assert_eq!(idle, ServoAngles { x_angle: 90, y_angle: 90 });
        assert_eq!(aim.last_angles(), Some(moved));
    }
}
