// Simulated robot hardware
//
// Provides:
// - Motors with a first-order velocity response and fault injection
// - Encoders, an inertial sensor and analog inputs
// - Differential-drive physics that ties the drive motors to the sensors

mod drivetrain;
mod motor;
mod sensors;

pub use drivetrain::{SimDrivetrain, PHYSICS_PERIOD};
pub use motor::SimMotor;
pub use sensors::{SimAnalog, SimEncoder, SimImu};

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{MotorConfig, RobotConfig};
use crate::motor::MotorDevice;
use crate::runtime::Hardware;
use crate::subsystems::{BALL_PRESENT_BELOW, BRAKE_LOWERED};

/// Every simulated device of the robot, with handles kept for inspection
pub struct SimRobot {
    pub front_left: SimMotor,
    pub front_right: SimMotor,
    pub back_left: SimMotor,
    pub back_right: SimMotor,
    pub left_intake: SimMotor,
    pub right_intake: SimMotor,
    pub upper_indexer: SimMotor,
    pub lower_indexer: SimMotor,
    pub differential_a: SimMotor,
    pub differential_b: SimMotor,
    pub left_encoder: SimEncoder,
    pub right_encoder: SimEncoder,
    pub lateral_encoder: SimEncoder,
    pub imu: SimImu,
    pub ball_sensor: SimAnalog,
    pub top_sensor: SimAnalog,
    pub potentiometer: SimAnalog,
    pub drivetrain: Arc<SimDrivetrain>,
}

fn sim_motor(config: &MotorConfig) -> SimMotor {
    let mut motor = SimMotor::new(config.port, config.gearset);
    // Infallible on the simulator
    let _ = motor.set_reversed(config.reversed);
    motor
}

impl SimRobot {
    pub fn new(config: &RobotConfig) -> Self {
        let m = &config.mechanisms;
        let front_left = sim_motor(&config.drive.front_left);
        let front_right = sim_motor(&config.drive.front_right);
        let back_left = sim_motor(&config.drive.back_left);
        let back_right = sim_motor(&config.drive.back_right);
        let left_intake = sim_motor(&m.left_intake);
        let right_intake = sim_motor(&m.right_intake);
        let upper_indexer = sim_motor(&m.upper_indexer);
        let lower_indexer = sim_motor(&m.lower_indexer);
        let differential_a = sim_motor(&m.differential_a);
        let differential_b = sim_motor(&m.differential_b);
        let left_encoder = SimEncoder::new();
        let right_encoder = SimEncoder::new();
        let lateral_encoder = SimEncoder::new();
        let imu = SimImu::new();

        let drivetrain = Arc::new(SimDrivetrain::new(
            vec![front_left.clone(), back_left.clone()],
            vec![front_right.clone(), back_right.clone()],
            vec![
                left_intake.clone(),
                right_intake.clone(),
                upper_indexer.clone(),
                lower_indexer.clone(),
                differential_a.clone(),
                differential_b.clone(),
            ],
            left_encoder.clone(),
            right_encoder.clone(),
            lateral_encoder.clone(),
            imu.clone(),
            config.geometry,
        ));

        Self {
            front_left,
            front_right,
            back_left,
            back_right,
            left_intake,
            right_intake,
            upper_indexer,
            lower_indexer,
            differential_a,
            differential_b,
            left_encoder,
            right_encoder,
            lateral_encoder,
            imu,
            ball_sensor: SimAnalog::new(BALL_PRESENT_BELOW + 400),
            top_sensor: SimAnalog::new(BALL_PRESENT_BELOW + 400),
            potentiometer: SimAnalog::new(BRAKE_LOWERED),
            drivetrain,
        }
    }

    /// Device handles for building the runtime
    pub fn hardware(&self) -> Hardware {
        Hardware {
            front_left: Box::new(self.front_left.clone()),
            front_right: Box::new(self.front_right.clone()),
            back_left: Box::new(self.back_left.clone()),
            back_right: Box::new(self.back_right.clone()),
            left_intake: Box::new(self.left_intake.clone()),
            right_intake: Box::new(self.right_intake.clone()),
            upper_indexer: Box::new(self.upper_indexer.clone()),
            lower_indexer: Box::new(self.lower_indexer.clone()),
            differential_a: Box::new(self.differential_a.clone()),
            differential_b: Box::new(self.differential_b.clone()),
            left_encoder: Box::new(self.left_encoder.clone()),
            right_encoder: Box::new(self.right_encoder.clone()),
            lateral_encoder: Box::new(self.lateral_encoder.clone()),
            imu: Arc::new(self.imu.clone()),
            ball_sensor: Arc::new(self.ball_sensor.clone()),
            top_sensor: Arc::new(self.top_sensor.clone()),
            potentiometer: Arc::new(self.potentiometer.clone()),
        }
    }

    pub fn spawn_physics(&self) -> JoinHandle<()> {
        Arc::clone(&self.drivetrain).spawn()
    }

    pub fn drive_motors(&self) -> [&SimMotor; 4] {
        [
            &self.front_left,
            &self.front_right,
            &self.back_left,
            &self.back_right,
        ]
    }
}
