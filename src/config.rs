// Loop periods, topics and the startup configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::control::PidGains;
use crate::error::Result;
use crate::motor::Gearset;
use crate::subsystems::chassis::{ChassisTuning, ProfileConfig};

// Motor scheduler period
pub const MOTOR_LOOP_PERIOD: Duration = Duration::from_millis(10);

// Pose estimator period
pub const ODOMETRY_PERIOD: Duration = Duration::from_millis(5);

// Actor idle delay when the command queue is empty
pub const ACTOR_IDLE_DELAY: Duration = Duration::from_millis(10);

// Poll period for synchronous callers waiting on a completion id
pub const COMPLETION_POLL_PERIOD: Duration = Duration::from_millis(10);

// Chassis motion primitive loop period
pub const MOTION_LOOP_PERIOD: Duration = Duration::from_millis(10);

// Full scale motor voltage in mV
pub const MAX_VOLTAGE: i32 = 12_000;

// Full scale of driver input (joystick units)
pub const MAX_DRIVER_INPUT: i32 = 127;

// Encoder resolution: ticks per wheel revolution
pub const TICKS_PER_REVOLUTION: f64 = 360.0;

// Settling window: sample count, velocity range and velocity ceiling
pub const SETTLE_WINDOW: usize = 15;
pub const SETTLE_RANGE: f64 = 2.0;
pub const SETTLE_VELOCITY: f64 = 2.0;

// Telemetry loop frequency
pub const LOOP_HZ: u64 = 50;

// Zenoh topics
pub const TOPIC_CMD_MOTION: &str = "robot/cmd/motion"; // motion requests
pub const TOPIC_POSE: &str = "robot/state/pose"; // pose estimate
pub const TOPIC_MOTORS: &str = "robot/state/motors"; // motor snapshots
pub const TOPIC_HEALTH: &str = "robot/state/health"; // health status

// Serial request channel
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Port, gearset and direction of one physical motor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotorConfig {
    pub port: u8,
    #[serde(default)]
    pub gearset: Gearset,
    #[serde(default)]
    pub reversed: bool,
}

impl MotorConfig {
    pub const fn new(port: u8, gearset: Gearset, reversed: bool) -> Self {
        Self {
            port,
            gearset,
            reversed,
        }
    }
}

/// Drive motors, two per side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveMotors {
    pub front_left: MotorConfig,
    pub front_right: MotorConfig,
    pub back_left: MotorConfig,
    pub back_right: MotorConfig,
}

/// Motors of the simple mechanisms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismMotors {
    pub left_intake: MotorConfig,
    pub right_intake: MotorConfig,
    pub upper_indexer: MotorConfig,
    pub lower_indexer: MotorConfig,
    pub differential_a: MotorConfig,
    pub differential_b: MotorConfig,
}

/// Tracking geometry in inches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DriveGeometry {
    /// Tracking wheel diameter
    pub wheel_diameter: f64,
    /// Distance from the tracking center to the left wheel
    pub left_track: f64,
    /// Distance from the tracking center to the right wheel
    pub right_track: f64,
    /// Signed offset of the lateral wheel from the tracking center
    pub lateral_offset: f64,
    /// Weight of the inertial heading in the fused heading, 0..1
    pub imu_weight: f64,
}

impl Default for DriveGeometry {
    fn default() -> Self {
        Self {
            wheel_diameter: 3.25,
            left_track: 6.35,
            right_track: 6.35,
            lateral_offset: 3.0,
            imu_weight: 0.7,
        }
    }
}

/// Startup configuration, immutable once the runtime is built
///
/// Gains may still be changed through the live tuning setters on the motor
/// control units and the chassis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub internal_motor_pid: PidGains,
    /// Motor slew rate in mV/ms
    pub motor_slew_rate: i32,
    pub drive: DriveMotors,
    pub mechanisms: MechanismMotors,
    pub geometry: DriveGeometry,
    pub chassis: ChassisTuning,
    pub profile: ProfileConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            internal_motor_pid: PidGains::new(10.0, 0.5, 0.0, 4000.0),
            motor_slew_rate: 30, // ~5% voltage per 20ms
            drive: DriveMotors {
                front_left: MotorConfig::new(3, Gearset::Green, false),
                front_right: MotorConfig::new(5, Gearset::Green, false),
                back_left: MotorConfig::new(4, Gearset::Green, false),
                back_right: MotorConfig::new(2, Gearset::Green, false),
            },
            mechanisms: MechanismMotors {
                left_intake: MotorConfig::new(6, Gearset::Green, false),
                right_intake: MotorConfig::new(8, Gearset::Green, true),
                upper_indexer: MotorConfig::new(7, Gearset::Blue, false),
                lower_indexer: MotorConfig::new(9, Gearset::Blue, false),
                differential_a: MotorConfig::new(10, Gearset::Green, false),
                differential_b: MotorConfig::new(11, Gearset::Green, true),
            },
            geometry: DriveGeometry::default(),
            chassis: ChassisTuning::default(),
            profile: ProfileConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Every configured motor port, drive first
    pub fn motor_ports(&self) -> Vec<u8> {
        let m = &self.mechanisms;
        vec![
            self.drive.front_left.port,
            self.drive.front_right.port,
            self.drive.back_left.port,
            self.drive.back_right.port,
            m.left_intake.port,
            m.right_intake.port,
            m.upper_indexer.port,
            m.lower_indexer.port,
            m.differential_a.port,
            m.differential_b.port,
        ]
    }
}
