// Dead-reckoning pose estimation
//
// Conventions: x/y in inches in the field frame, heading in radians in
// (-π, π], 0 facing +x and positive clockwise like the inertial sensor.

mod estimator;
mod tracker;

pub use estimator::PoseEstimator;
pub use tracker::{fuse_heading, SensorSample, Tracker};

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::config::TICKS_PER_REVOLUTION;

/// Robot pose in the field frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Radians in (-π, π]
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: wrap_angle(heading),
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn heading_degrees(&self) -> f64 {
        to_degrees(self.heading)
    }
}

/// A field coordinate in inches
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Wheel travel for `ticks` encoder ticks
pub fn to_inches(ticks: f64, wheel_diameter: f64) -> f64 {
    PI * wheel_diameter / TICKS_PER_REVOLUTION * ticks
}

/// Encoder ticks for `inches` of wheel travel
pub fn to_encoder_ticks(inches: f64, wheel_diameter: f64) -> f64 {
    inches * TICKS_PER_REVOLUTION / (PI * wheel_diameter)
}

pub fn to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

pub fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / PI
}

/// Normalize an angle into (-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut wrapped = angle % TAU;
    if wrapped > PI {
        wrapped -= TAU;
    } else if wrapped <= -PI {
        wrapped += TAU;
    }
    wrapped
}

/// Shortest signed rotation equal to `delta`
///
/// A step from 3.13 to -3.13 is a small positive turn, not -6.26.
pub fn wrap_delta(delta: f64) -> f64 {
    wrap_angle(delta)
}

/// Accumulates heading change across the ±π seam
///
/// Fed absolute headings in radians; reports the total signed rotation since
/// it was created, which may exceed a full turn.
#[derive(Debug, Clone, Copy)]
pub struct HeadingAccumulator {
    last: f64,
    total: f64,
}

impl HeadingAccumulator {
    pub fn new(heading: f64) -> Self {
        Self {
            last: heading,
            total: 0.0,
        }
    }

    pub fn update(&mut self, heading: f64) -> f64 {
        self.total += wrap_delta(heading - self.last);
        self.last = heading;
        self.total
    }

    pub fn radians(&self) -> f64 {
        self.total
    }

    pub fn degrees(&self) -> f64 {
        to_degrees(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_inches_round_trip() {
        for diameter in [2.75, 3.25, 4.0, 0.5] {
            for ticks in [-5000.0, -1.0, 0.0, 0.25, 360.0, 123_456.0] {
                let back = to_encoder_ticks(to_inches(ticks, diameter), diameter);
                assert!((back - ticks).abs() < 1e-9 * ticks.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_one_revolution_is_circumference() {
        assert!((to_inches(360.0, 4.0) - 4.0 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_wrap_angle_range() {
        assert_eq!(wrap_angle(PI), PI);
        assert_eq!(wrap_angle(-PI), PI);
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(5.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(wrap_angle(0.5), 0.5);
    }

    #[test]
    fn test_delta_across_seam_is_small() {
        let delta = wrap_delta(-3.13 - 3.13);
        assert!(delta > 0.0 && delta < 0.03);

        let delta = wrap_delta(3.13 - -3.13);
        assert!(delta < 0.0 && delta > -0.03);
    }

    #[test]
    fn test_accumulator_crosses_seam() {
        let mut acc = HeadingAccumulator::new(3.0);
        acc.update(3.1);
        acc.update(-3.1);
        acc.update(-3.0);
        let expected = 0.1 + (TAU - 6.2) + 0.1;
        assert!((acc.radians() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_accumulator_exceeds_full_turn() {
        let mut acc = HeadingAccumulator::new(0.0);
        for step in 1..=40 {
            acc.update(wrap_angle(step as f64 * 0.2));
        }
        assert!((acc.radians() - 8.0).abs() < 1e-9);
    }
}
