// Per-cycle pose update from encoder and inertial readings
//
// Pure state machine with no I/O, so every numeric edge case can be driven
// directly from tests. The estimator task feeds it one sample per cycle.

use std::f64::consts::{PI, TAU};

use super::{to_inches, to_radians, wrap_angle, wrap_delta, Pose};
use crate::config::DriveGeometry;

// Below this heading change the motion is treated as a straight line
const MIN_ARC_ANGLE: f64 = 1e-6;

/// Cumulative readings taken in one estimator cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSample {
    pub left_ticks: f64,
    pub right_ticks: f64,
    pub lateral_ticks: f64,
    /// Inertial heading in degrees, clockwise, [0, 360)
    pub imu_degrees: f64,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    geometry: DriveGeometry,
    pose: Pose,
    delta_theta: f64,
    // Readings and heading captured at the last reset
    initial_left: f64,
    initial_right: f64,
    initial_heading: f64,
    imu_offset: f64,
    // Readings from the previous cycle
    prev: SensorSample,
}

impl Tracker {
    pub fn new(geometry: DriveGeometry) -> Self {
        Self {
            geometry,
            pose: Pose::default(),
            delta_theta: 0.0,
            initial_left: 0.0,
            initial_right: 0.0,
            initial_heading: 0.0,
            imu_offset: 0.0,
            prev: SensorSample::default(),
        }
    }

    /// Jump to `pose`, treating `sample` as the readings taken at that pose
    pub fn reset(&mut self, pose: Pose, sample: &SensorSample) {
        let heading = wrap_angle(pose.heading);
        self.pose = Pose { heading, ..pose };
        self.delta_theta = 0.0;
        self.initial_left = sample.left_ticks;
        self.initial_right = sample.right_ticks;
        self.initial_heading = heading;
        self.imu_offset = heading - to_radians(sample.imu_degrees);
        self.prev = *sample;
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Heading change applied by the last update, in radians
    pub fn delta_theta(&self) -> f64 {
        self.delta_theta
    }

    pub fn geometry(&self) -> &DriveGeometry {
        &self.geometry
    }

    /// Fold one cycle of readings into the pose
    pub fn update(&mut self, sample: &SensorSample) -> Pose {
        let g = self.geometry;
        let d = g.wheel_diameter;

        let right = to_inches(sample.right_ticks - self.prev.right_ticks, d);
        let lateral = to_inches(sample.lateral_ticks - self.prev.lateral_ticks, d);
        self.prev = *sample;

        // Absolute heading from total wheel travel since the reset
        let total_left = to_inches(sample.left_ticks - self.initial_left, d);
        let total_right = to_inches(sample.right_ticks - self.initial_right, d);
        let track_width = g.left_track + g.right_track;
        let encoder_heading =
            wrap_angle(self.initial_heading + (total_left - total_right) / track_width);
        let imu_heading = wrap_angle(self.imu_offset + to_radians(sample.imu_degrees));

        let heading = fuse_heading(encoder_heading, imu_heading, g.imu_weight);
        let delta_theta = wrap_delta(heading - self.pose.heading);

        let (local_x, local_y) = if delta_theta.abs() < MIN_ARC_ANGLE {
            (right, lateral)
        } else {
            let chord = 2.0 * (delta_theta / 2.0).sin();
            (
                chord * (right / delta_theta + g.right_track),
                chord * (lateral / delta_theta + g.lateral_offset),
            )
        };

        // Rotate into the field frame at the mid-interval heading
        let average_heading = self.pose.heading + delta_theta / 2.0;
        let radius = local_x.hypot(local_y);
        let angle = local_y.atan2(local_x) - average_heading;
        let dx = nan_to_zero(radius * angle.cos());
        let dy = nan_to_zero(radius * angle.sin());

        self.pose = Pose {
            x: self.pose.x + dx,
            y: self.pose.y + dy,
            heading,
        };
        self.delta_theta = delta_theta;
        self.pose
    }
}

/// Blend encoder and inertial headings, both in (-π, π]
///
/// Readings on opposite sides of the seam are first moved onto the same
/// branch so that 179° and -179° blend to ±180°, not to 0°.
pub fn fuse_heading(encoder: f64, imu: f64, imu_weight: f64) -> f64 {
    let mut imu = imu;
    if (encoder < 0.0) != (imu < 0.0) && encoder.abs() + imu.abs() > PI {
        if imu < 0.0 {
            imu += TAU;
        } else {
            imu -= TAU;
        }
    }
    wrap_angle(imu_weight * imu + (1.0 - imu_weight) * encoder)
}

fn nan_to_zero(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value }
}
