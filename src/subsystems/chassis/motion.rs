// Closed-loop motion primitives
//
// Every primitive follows the same shape: take the drive, loop at the motion
// period until settled or timed out, then hand the drive back at zero volts.
// A drive that comes to rest only counts as settled once it has moved, or
// when it is already within tolerance of the target; otherwise the timeout
// decides.

use std::collections::VecDeque;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::{Chassis, OpenLoop, ProfiledDrive, StraightDrive, Turn};
use crate::config::{MOTION_LOOP_PERIOD, SETTLE_RANGE, SETTLE_VELOCITY, SETTLE_WINDOW};
use crate::control::{slew_limit, Pid};
use crate::motor::{MotorControlUnit, MotorMode};
use crate::odometry::HeadingAccumulator;
use crate::sensors::ReferenceId;
use crate::subsystems::Outcome;

// Heading error a turn may rest at without ever having moved
const TURN_TOLERANCE: f64 = 1.0;

/// Sliding window of side velocities used to detect convergence
#[derive(Debug, Clone)]
pub struct SettleWindow {
    left: VecDeque<f64>,
    right: VecDeque<f64>,
    capacity: usize,
    moved: bool,
}

impl Default for SettleWindow {
    fn default() -> Self {
        Self::new(SETTLE_WINDOW)
    }
}

impl SettleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            left: VecDeque::with_capacity(capacity + 1),
            right: VecDeque::with_capacity(capacity + 1),
            capacity,
            moved: false,
        }
    }

    pub fn push(&mut self, left: f64, right: f64) {
        if left.abs() > SETTLE_VELOCITY || right.abs() > SETTLE_VELOCITY {
            self.moved = true;
        }
        self.left.push_back(left);
        self.right.push_back(right);
        if self.left.len() > self.capacity {
            self.left.pop_front();
            self.right.pop_front();
        }
    }

    /// Full window, narrow spread and near-zero current velocity on both sides
    pub fn is_quiet(&self) -> bool {
        self.left.len() >= self.capacity && side_settled(&self.left) && side_settled(&self.right)
    }

    /// Whether either side ever exceeded the settle velocity
    pub fn has_moved(&self) -> bool {
        self.moved
    }

    /// Quiet after real motion
    pub fn is_settled(&self) -> bool {
        self.moved && self.is_quiet()
    }

    /// Quiet after motion, or quiet with the error already in tolerance
    pub fn settled_near(&self, in_tolerance: bool) -> bool {
        self.is_quiet() && (self.moved || in_tolerance)
    }
}

fn side_settled(samples: &VecDeque<f64>) -> bool {
    let Some(current) = samples.back() else {
        return false;
    };
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    max - min < SETTLE_RANGE && current.abs() < SETTLE_VELOCITY
}

/// Encoder references held for the duration of one primitive
struct Session {
    left: ReferenceId,
    right: ReferenceId,
}

/// Scale `velocity` toward zero by `amount`, never past it
fn ease(velocity: f64, amount: f64) -> f64 {
    if velocity >= 0.0 {
        (velocity - amount).max(0.0)
    } else {
        (velocity + amount).min(0.0)
    }
}

fn mean_velocity(units: &[std::sync::Arc<MotorControlUnit>]) -> Option<f64> {
    let mut total = 0.0;
    for unit in units {
        match unit.actual_velocity() {
            Ok(v) => total += v,
            Err(e) => {
                warn!("Drive motor {} velocity unreadable: {}", unit.port(), e);
                return None;
            }
        }
    }
    Some(total / units.len() as f64)
}

impl Chassis {
    /// Take the drive: fresh encoder references, no driver input, native velocity
    fn begin(&self) -> Session {
        for unit in self.units() {
            unit.disallow_driver_control();
            unit.set_mode(MotorMode::Velocity);
        }
        Session {
            left: self.drive.left_encoder.acquire_reference(),
            right: self.drive.right_encoder.acquire_reference(),
        }
    }

    /// Hand the drive back at zero volts
    fn finish(&self, session: Session) {
        self.stop_drive();
        for unit in self.units() {
            unit.allow_driver_control();
        }
        self.drive.left_encoder.release(session.left);
        self.drive.right_encoder.release(session.right);
    }

    pub(super) fn stop_drive(&self) {
        for unit in self.units() {
            unit.set_mode(MotorMode::Voltage);
            unit.set_voltage(0);
        }
    }

    fn read_sides(&self, session: &Session) -> Option<(f64, f64)> {
        let left = self.drive.left_encoder.position(session.left);
        let right = self.drive.right_encoder.position(session.right);
        match (left, right) {
            (Ok(left), Ok(right)) => Some((left, right)),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Skipping motion tick: {}", e);
                None
            }
        }
    }

    fn side_velocities(&self) -> Option<(f64, f64)> {
        Some((mean_velocity(&self.drive.left)?, mean_velocity(&self.drive.right)?))
    }

    fn command_sides(&self, left: f64, right: f64) {
        for unit in &self.drive.left {
            unit.set_velocity(left.round() as i32);
        }
        for unit in &self.drive.right {
            unit.set_velocity(right.round() as i32);
        }
    }

    /// Sleep one loop period, never past `deadline`
    async fn pause(deadline: Instant) {
        sleep_until((Instant::now() + MOTION_LOOP_PERIOD).min(deadline)).await;
    }

    pub(super) async fn pid_straight(&self, drive: StraightDrive) -> Outcome {
        let tuning = self.tuning();
        let max = drive.max_velocity.abs();
        let forward = drive.ticks >= 0.0;
        let mut left_pid = Pid::new(tuning.straight);
        let mut right_pid = Pid::new(tuning.straight);
        let mut heading = HeadingAccumulator::new(self.estimator.heading_rad());
        let mut window = SettleWindow::default();
        let mut commanded = (0.0, 0.0);
        let mut in_tolerance = false;

        let session = self.begin();
        let deadline = Instant::now() + drive.timeout;
        let outcome = loop {
            if Instant::now() >= deadline {
                break Outcome::TimedOut;
            }

            if let Some((left_ticks, right_ticks)) = self.read_sides(&session) {
                in_tolerance = (drive.ticks - left_ticks).abs() < tuning.stop_threshold
                    && (drive.ticks - right_ticks).abs() < tuning.stop_threshold;
                heading.update(self.estimator.heading_rad());
                let mut left = left_pid.update(drive.ticks, left_ticks).clamp(-max, max);
                let mut right = right_pid.update(drive.ticks, right_ticks).clamp(-max, max);

                // Turning clockwise means the left side outruns the right
                let heading_error = drive.heading - heading.degrees();
                let correction = (tuning.heading_kp * heading_error).abs();
                if (heading_error > 0.0) == forward {
                    right = ease(right, correction);
                } else {
                    left = ease(left, correction);
                }

                commanded = (
                    slew_limit(commanded.0, left, tuning.velocity_slew),
                    slew_limit(commanded.1, right, tuning.velocity_slew),
                );
                self.command_sides(commanded.0, commanded.1);
            }

            if let Some((left, right)) = self.side_velocities() {
                window.push(left, right);
                if window.settled_near(in_tolerance) {
                    break Outcome::Settled;
                }
            }
            Self::pause(deadline).await;
        };

        if let Some((left, right)) = self.read_sides(&session) {
            debug!(
                "Straight drive to {} ticks: {:?} at ({:.1}, {:.1})",
                drive.ticks, outcome, left, right
            );
        }
        self.finish(session);
        outcome
    }

    pub(super) async fn pid_turn(&self, turn: Turn) -> Outcome {
        let tuning = self.tuning();
        let max = turn.max_velocity.abs();
        let mut pid = Pid::new(tuning.turn);
        let mut heading = HeadingAccumulator::new(self.estimator.heading_rad());
        let mut window = SettleWindow::default();
        let mut commanded = 0.0;

        let session = self.begin();
        let deadline = Instant::now() + turn.timeout;
        let outcome = loop {
            if Instant::now() >= deadline {
                break Outcome::TimedOut;
            }

            heading.update(self.estimator.heading_rad());
            let velocity = pid.update(turn.degrees, heading.degrees()).clamp(-max, max);
            commanded = slew_limit(commanded, velocity, tuning.velocity_slew);
            self.command_sides(commanded, -commanded);
            let in_tolerance = (turn.degrees - heading.degrees()).abs() < TURN_TOLERANCE;

            if let Some((left, right)) = self.side_velocities() {
                window.push(left, right);
                if window.settled_near(in_tolerance) {
                    break Outcome::Settled;
                }
            }
            Self::pause(deadline).await;
        };

        debug!(
            "Turn to {:.1}°: {:?} at {:.1}°",
            turn.degrees,
            outcome,
            heading.degrees()
        );
        self.finish(session);
        outcome
    }

    pub(super) async fn profiled_straight(&self, drive: ProfiledDrive) -> Outcome {
        let tuning = self.tuning();
        let max = drive.max_velocity.abs();
        let total = drive.ticks.abs();
        let direction = if drive.ticks < 0.0 { -1.0 } else { 1.0 };
        let mut heading = HeadingAccumulator::new(self.estimator.heading_rad());
        let mut heading_integral = 0.0;

        let session = self.begin();
        let deadline = Instant::now() + drive.timeout;
        let outcome = loop {
            if Instant::now() >= deadline {
                break Outcome::TimedOut;
            }

            if let Some((left_ticks, right_ticks)) = self.read_sides(&session) {
                let left_remaining = total - left_ticks * direction;
                let right_remaining = total - right_ticks * direction;
                if left_remaining < tuning.stop_threshold || right_remaining < tuning.stop_threshold {
                    break Outcome::Settled;
                }

                let traveled = (left_ticks + right_ticks) / 2.0 * direction;
                let velocity = max * self.profile.fraction(traveled, total) * direction;

                heading.update(self.estimator.heading_rad());
                heading_integral += drive.heading - heading.degrees();
                let correction = tuning.heading_ki * heading_integral;
                self.command_sides(
                    (velocity + correction).clamp(-max, max),
                    (velocity - correction).clamp(-max, max),
                );
            }
            Self::pause(deadline).await;
        };

        debug!("Profiled drive of {} ticks: {:?}", drive.ticks, outcome);
        self.finish(session);
        outcome
    }

    /// Drive fixed voltages with the drive motors detached from the scheduler
    pub(super) async fn open_loop(&self, open: OpenLoop) -> Outcome {
        let units: Vec<_> = self.units().cloned().collect();
        for unit in &units {
            self.scheduler.unregister(unit);
        }

        let write = |unit: &MotorControlUnit, millivolts: i32| {
            if let Err(e) = unit.write_direct_voltage(millivolts) {
                warn!("Open-loop write to port {} failed: {}", unit.port(), e);
            }
        };

        let deadline = Instant::now() + open.duration;
        while Instant::now() < deadline {
            for unit in &self.drive.left {
                write(unit, open.left_mv);
            }
            for unit in &self.drive.right {
                write(unit, open.right_mv);
            }
            Self::pause(deadline).await;
        }

        for unit in &units {
            write(unit, 0);
            unit.set_mode(MotorMode::Voltage);
            unit.set_voltage(0);
            self.scheduler.register(unit);
        }
        Outcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_needs_full_history() {
        let mut window = SettleWindow::new(15);
        window.push(40.0, 40.0);
        for _ in 0..14 {
            window.push(0.0, 0.0);
        }
        assert!(!window.is_settled());
        window.push(0.0, 0.0);
        assert!(window.is_settled());
    }

    #[test]
    fn test_window_at_rest_without_motion_is_not_settled() {
        let mut window = SettleWindow::new(15);
        for _ in 0..100 {
            window.push(0.0, 0.0);
        }
        assert!(window.is_quiet());
        assert!(!window.has_moved());
        assert!(!window.is_settled());
        assert!(!window.settled_near(false));
        // Already on target, e.g. a zero-degree turn
        assert!(window.settled_near(true));
    }

    #[test]
    fn test_window_rejects_spread() {
        let mut window = SettleWindow::new(15);
        for i in 0..15 {
            window.push(i as f64 * 0.2, 0.0);
        }
        // Spread 2.8 on the left
        assert!(!window.is_settled());
    }

    #[test]
    fn test_window_rejects_steady_motion() {
        let mut window = SettleWindow::new(15);
        for _ in 0..15 {
            window.push(150.0, 150.0);
        }
        assert!(!window.is_settled());
    }

    #[test]
    fn test_window_slides() {
        let mut window = SettleWindow::new(15);
        for _ in 0..15 {
            window.push(50.0, -50.0);
        }
        for _ in 0..15 {
            window.push(0.5, -0.5);
        }
        assert!(window.is_settled());
    }

    #[test]
    fn test_ease_stops_at_zero() {
        assert_eq!(ease(100.0, 30.0), 70.0);
        assert_eq!(ease(-100.0, 30.0), -70.0);
        assert_eq!(ease(10.0, 30.0), 0.0);
        assert_eq!(ease(-10.0, 30.0), 0.0);
    }
}
