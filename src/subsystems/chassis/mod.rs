// Chassis motion engine
//
// Runs closed-loop motion primitives on the drive motors from the chassis
// actor task. While a primitive runs it owns the drive: driver input is
// ignored and the motors track velocity natively. Both are restored on exit.
// Routes run as a single command; a stop abandons the legs a route has not
// started yet.

mod motion;
mod navigation;
mod profile;

pub use motion::SettleWindow;
pub use navigation::{
    plan_route, plan_turn_to_angle, plan_turn_to_point, Direction, Leg, LegDrive, RouteOptions,
};
pub use profile::{MotionProfile, ProfileConfig, ProfileShape};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::actor::{Actor, CommandId, Mechanism, Outcome};
use crate::control::PidGains;
use crate::error::Result;
use crate::motor::{BrakeMode, MotorControlUnit, MotorScheduler};
use crate::odometry::{Point, PoseEstimator};
use crate::sensors::Encoder;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_VELOCITY: f64 = 200.0;

/// Gains and limits of the chassis loops, live-tunable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisTuning {
    /// Straight drive, RPM per tick of error
    pub straight: PidGains,
    /// Turns, RPM per degree of error
    pub turn: PidGains,
    /// Straight drive heading correction, RPM per degree
    pub heading_kp: f64,
    /// Profiled drive heading correction, RPM per accumulated degree
    pub heading_ki: f64,
    /// Largest change of commanded velocity per loop, RPM
    pub velocity_slew: f64,
    /// Remaining ticks at which a profiled drive stops
    pub stop_threshold: f64,
}

impl Default for ChassisTuning {
    fn default() -> Self {
        Self {
            straight: PidGains::new(0.5, 0.0005, 0.0, 5000.0),
            turn: PidGains::new(2.0, 0.0, 0.0, 1000.0),
            heading_kp: 4.0,
            heading_ki: 0.05,
            velocity_slew: 15.0,
            stop_threshold: 8.0,
        }
    }
}

/// PID straight drive to a tick target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightDrive {
    /// Target travel in encoder ticks, negative drives backward
    pub ticks: f64,
    /// Heading to hold, degrees clockwise relative to the start
    pub heading: f64,
    pub max_velocity: f64,
    pub timeout: Duration,
}

impl StraightDrive {
    pub fn new(ticks: f64) -> Self {
        Self {
            ticks,
            heading: 0.0,
            max_velocity: DEFAULT_MAX_VELOCITY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn heading(mut self, degrees: f64) -> Self {
        self.heading = degrees;
        self
    }

    pub fn max_velocity(mut self, rpm: f64) -> Self {
        self.max_velocity = rpm;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Straight drive following the motion profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfiledDrive {
    pub ticks: f64,
    pub heading: f64,
    pub max_velocity: f64,
    pub timeout: Duration,
}

impl ProfiledDrive {
    pub fn new(ticks: f64) -> Self {
        Self {
            ticks,
            heading: 0.0,
            max_velocity: DEFAULT_MAX_VELOCITY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn max_velocity(mut self, rpm: f64) -> Self {
        self.max_velocity = rpm;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// PID turn in place
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Turn {
    /// Degrees clockwise relative to the start
    pub degrees: f64,
    pub max_velocity: f64,
    pub timeout: Duration,
}

impl Turn {
    pub fn new(degrees: f64) -> Self {
        Self {
            degrees,
            max_velocity: DEFAULT_MAX_VELOCITY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn max_velocity(mut self, rpm: f64) -> Self {
        self.max_velocity = rpm;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Fixed voltages written straight to the drive, bypassing the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenLoop {
    pub left_mv: i32,
    pub right_mv: i32,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChassisCommand {
    Straight(StraightDrive),
    Profiled(ProfiledDrive),
    Turn(Turn),
    OpenLoop(OpenLoop),
    /// Turn-then-drive legs to a field point, planned when the command starts
    Route { target: Point, options: RouteOptions },
    TurnToPoint { target: Point, direction: Direction },
    /// Absolute field heading, degrees
    TurnToAngle(f64),
    Stop,
}

/// Drive motors and tracking encoders
pub struct DriveTrain {
    pub left: [Arc<MotorControlUnit>; 2],
    pub right: [Arc<MotorControlUnit>; 2],
    pub left_encoder: Arc<Encoder>,
    pub right_encoder: Arc<Encoder>,
}

pub struct Chassis {
    drive: DriveTrain,
    estimator: Arc<PoseEstimator>,
    scheduler: Arc<MotorScheduler>,
    profile: Arc<MotionProfile>,
    wheel_diameter: f64,
    tuning: Mutex<ChassisTuning>,
    // Bumped by every stop; a route ends once it differs from its start value
    stops: AtomicU64,
}

impl Chassis {
    pub fn new(
        drive: DriveTrain,
        estimator: Arc<PoseEstimator>,
        scheduler: Arc<MotorScheduler>,
        profile: Arc<MotionProfile>,
        wheel_diameter: f64,
        tuning: ChassisTuning,
    ) -> Self {
        let chassis = Self {
            drive,
            estimator,
            scheduler,
            profile,
            wheel_diameter,
            tuning: Mutex::new(tuning),
            stops: AtomicU64::new(0),
        };
        for unit in chassis.units() {
            unit.disable_velocity_pid();
            unit.disable_slew();
            if let Err(e) = unit.set_brake_mode(BrakeMode::Brake) {
                warn!("Drive motor {} brake mode not set: {}", unit.port(), e);
            }
        }
        chassis
    }

    fn units(&self) -> impl Iterator<Item = &Arc<MotorControlUnit>> {
        self.drive.left.iter().chain(self.drive.right.iter())
    }

    fn tuning_guard(&self) -> MutexGuard<'_, ChassisTuning> {
        self.tuning.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tuning(&self) -> ChassisTuning {
        *self.tuning_guard()
    }

    /// Replace the loop gains; picked up by the next primitive
    pub fn set_tuning(&self, tuning: ChassisTuning) {
        info!("Chassis tuning updated");
        *self.tuning_guard() = tuning;
    }

    /// Make any running route give up before its next primitive
    pub fn abort_route(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_count(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn wheel_diameter(&self) -> f64 {
        self.wheel_diameter
    }

    pub fn estimator(&self) -> &Arc<PoseEstimator> {
        &self.estimator
    }

    /// Driver pass-through for each side, in [-127, 127]
    pub fn move_sides(&self, left: i32, right: i32) {
        for unit in &self.drive.left {
            unit.driver_move(left);
        }
        for unit in &self.drive.right {
            unit.driver_move(right);
        }
    }

    /// Driver pass-through for the whole drive
    pub fn move_all(&self, value: i32) {
        self.move_sides(value, value);
    }

    pub fn set_brake_mode(&self, mode: BrakeMode) -> Result<()> {
        for unit in self.units() {
            unit.set_brake_mode(mode)?;
        }
        Ok(())
    }

    /// Flip every drive motor, so the back of the robot becomes the front
    pub fn change_direction(&self) -> Result<()> {
        for unit in self.units() {
            unit.set_reversed(!unit.is_reversed())?;
        }
        Ok(())
    }

    /// Slew-limit manual drive at `rate` mV/ms
    pub fn enable_slew(&self, rate: i32) {
        for unit in self.units() {
            unit.enable_slew();
            unit.set_slew_rate(rate);
        }
    }

    pub fn disable_slew(&self) {
        for unit in self.units() {
            unit.disable_slew();
        }
    }
}

impl Mechanism for Chassis {
    type Command = ChassisCommand;
    const NAME: &'static str = "chassis";

    async fn execute(&self, command: ChassisCommand) -> Outcome {
        match command {
            ChassisCommand::Straight(drive) => self.pid_straight(drive).await,
            ChassisCommand::Profiled(drive) => self.profiled_straight(drive).await,
            ChassisCommand::Turn(turn) => self.pid_turn(turn).await,
            ChassisCommand::OpenLoop(open) => self.open_loop(open).await,
            ChassisCommand::Route { target, options } => self.follow_route(target, options).await,
            ChassisCommand::TurnToPoint { target, direction } => {
                self.turn_toward(target, direction).await
            }
            ChassisCommand::TurnToAngle(degrees) => self.turn_onto(degrees).await,
            ChassisCommand::Stop => {
                self.stop_drive();
                Outcome::Completed
            }
        }
    }
}

impl Actor<Chassis> {
    pub fn drive_straight(&self, drive: StraightDrive) -> CommandId {
        self.submit(ChassisCommand::Straight(drive))
    }

    pub fn drive_profiled(&self, drive: ProfiledDrive) -> CommandId {
        self.submit(ChassisCommand::Profiled(drive))
    }

    pub fn turn(&self, turn: Turn) -> CommandId {
        self.submit(ChassisCommand::Turn(turn))
    }

    pub fn open_loop(&self, open: OpenLoop) -> CommandId {
        self.submit(ChassisCommand::OpenLoop(open))
    }

    /// Cancel the backlog and stop once the current primitive ends
    ///
    /// A running route finishes its current primitive and then reports
    /// `Cancelled` without starting the next one.
    pub fn stop(&self) -> CommandId {
        self.mechanism().abort_route();
        self.reset_queue();
        self.submit(ChassisCommand::Stop)
    }
}
