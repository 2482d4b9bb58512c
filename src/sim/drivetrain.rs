// Differential-drive physics for the simulated robot
//
// Integrates the drive motors into tracking-wheel ticks and an inertial
// heading. Tracking wheels ride on the drive wheels, so one degree of drive
// rotation is one encoder tick.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::{SimEncoder, SimImu, SimMotor};
use crate::config::DriveGeometry;
use crate::odometry::{to_degrees, to_encoder_ticks, to_inches};

// Physics integration period
pub const PHYSICS_PERIOD: Duration = Duration::from_millis(5);

pub struct SimDrivetrain {
    left: Vec<SimMotor>,
    right: Vec<SimMotor>,
    // Motors that are integrated but do not move the chassis
    other: Vec<SimMotor>,
    left_encoder: SimEncoder,
    right_encoder: SimEncoder,
    lateral_encoder: SimEncoder,
    imu: SimImu,
    geometry: DriveGeometry,
    heading: Mutex<f64>,
}

impl SimDrivetrain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Vec<SimMotor>,
        right: Vec<SimMotor>,
        other: Vec<SimMotor>,
        left_encoder: SimEncoder,
        right_encoder: SimEncoder,
        lateral_encoder: SimEncoder,
        imu: SimImu,
        geometry: DriveGeometry,
    ) -> Self {
        Self {
            left,
            right,
            other,
            left_encoder,
            right_encoder,
            lateral_encoder,
            imu,
            geometry,
            heading: Mutex::new(0.0),
        }
    }

    fn heading(&self) -> MutexGuard<'_, f64> {
        self.heading.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance every motor and the chassis by `dt`
    pub fn step(&self, dt: Duration) {
        let left_before = side_position(&self.left);
        let right_before = side_position(&self.right);
        for motor in self.left.iter().chain(&self.right).chain(&self.other) {
            motor.advance(dt);
        }
        let left_ticks = side_position(&self.left) - left_before;
        let right_ticks = side_position(&self.right) - right_before;

        let d = self.geometry.wheel_diameter;
        let left = to_inches(left_ticks, d);
        let right = to_inches(right_ticks, d);
        let delta_heading = (left - right) / (self.geometry.left_track + self.geometry.right_track);

        self.left_encoder.add(left_ticks);
        self.right_encoder.add(right_ticks);
        // Pure rotation swings the lateral wheel around the tracking center
        self.lateral_encoder
            .add(to_encoder_ticks(-delta_heading * self.geometry.lateral_offset, d));

        let mut heading = self.heading();
        *heading += delta_heading;
        self.imu.set_heading(to_degrees(*heading));
    }

    /// Chassis heading in radians, unwrapped
    pub fn true_heading(&self) -> f64 {
        *self.heading()
    }

    /// Integrate on a fixed period until the handle is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting drivetrain simulation ({:?} period)", PHYSICS_PERIOD);
        tokio::spawn(async move {
            let mut ticker = interval(PHYSICS_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.step(PHYSICS_PERIOD);
            }
        })
    }
}

// Mean physical position of one side in degrees
fn side_position(motors: &[SimMotor]) -> f64 {
    if motors.is_empty() {
        return 0.0;
    }
    motors.iter().map(SimMotor::physical_position).sum::<f64>() / motors.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Gearset, MotorDevice};

    fn drivetrain() -> (SimDrivetrain, SimMotor, SimMotor, SimEncoder, SimImu) {
        let left = SimMotor::new(1, Gearset::Green);
        let right = SimMotor::new(2, Gearset::Green);
        let left_encoder = SimEncoder::new();
        let imu = SimImu::new();
        let drivetrain = SimDrivetrain::new(
            vec![left.clone()],
            vec![right.clone()],
            Vec::new(),
            left_encoder.clone(),
            SimEncoder::new(),
            SimEncoder::new(),
            imu.clone(),
            DriveGeometry::default(),
        );
        (drivetrain, left, right, left_encoder, imu)
    }

    #[test]
    fn test_straight_motion_keeps_heading() {
        let (drivetrain, mut left, mut right, left_encoder, _imu) = drivetrain();
        left.set_velocity(100).unwrap();
        right.set_velocity(100).unwrap();
        for _ in 0..200 {
            drivetrain.step(PHYSICS_PERIOD);
        }
        assert_eq!(drivetrain.true_heading(), 0.0);
        assert!(left_encoder.position_ticks() > 0.0);
    }

    #[test]
    fn test_opposite_sides_turn_clockwise() {
        let (drivetrain, mut left, mut right, _encoder, imu) = drivetrain();
        left.set_velocity(50).unwrap();
        right.set_velocity(-50).unwrap();
        for _ in 0..20 {
            drivetrain.step(PHYSICS_PERIOD);
        }
        assert!(drivetrain.true_heading() > 0.0);
        let reading = crate::sensors::HeadingSensor::heading(&imu).unwrap();
        assert!(reading > 0.0 && reading < 180.0);
    }
}
