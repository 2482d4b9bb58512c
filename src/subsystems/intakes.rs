// Intake rollers

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::actor::{Actor, CommandId, Mechanism, Outcome};
use super::{BALL_PRESENT_BELOW, SENSOR_POLL_PERIOD};
use crate::config::MAX_VOLTAGE;
use crate::motor::{BrakeMode, MotorControlUnit};
use crate::sensors::AnalogSensor;

// Time the rollers keep pulling once a ball reaches the sensor
const SECURE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeCommand {
    Intake,
    Outtake,
    Stop,
    /// Intake for a fixed time, then stop
    IntakeFor(Duration),
    /// Intake until a ball is seen or the timeout passes, then stop
    IntakeUntilSecured { timeout: Duration },
}

pub struct Intakes {
    left: Arc<MotorControlUnit>,
    right: Arc<MotorControlUnit>,
    ball_sensor: Arc<dyn AnalogSensor>,
}

impl Intakes {
    pub fn new(
        left: Arc<MotorControlUnit>,
        right: Arc<MotorControlUnit>,
        ball_sensor: Arc<dyn AnalogSensor>,
    ) -> Self {
        for motor in [&left, &right] {
            motor.disable_velocity_pid();
            motor.disable_slew();
            if let Err(e) = motor.set_brake_mode(BrakeMode::Brake) {
                warn!("Intake motor {} brake mode not set: {}", motor.port(), e);
            }
        }
        Self {
            left,
            right,
            ball_sensor,
        }
    }

    fn set_voltage(&self, millivolts: i32) {
        self.left.set_voltage(millivolts);
        self.right.set_voltage(millivolts);
    }

    fn ball_present(&self) -> bool {
        match self.ball_sensor.value() {
            Ok(value) => value < BALL_PRESENT_BELOW,
            Err(e) => {
                warn!("Ball sensor unreadable: {}", e);
                false
            }
        }
    }
}

impl Mechanism for Intakes {
    type Command = IntakeCommand;
    const NAME: &'static str = "intakes";

    async fn execute(&self, command: IntakeCommand) -> Outcome {
        match command {
            IntakeCommand::Intake => self.set_voltage(MAX_VOLTAGE),
            IntakeCommand::Outtake => self.set_voltage(-MAX_VOLTAGE),
            IntakeCommand::Stop => self.set_voltage(0),
            IntakeCommand::IntakeFor(duration) => {
                self.set_voltage(MAX_VOLTAGE);
                sleep(duration).await;
                self.set_voltage(0);
            }
            IntakeCommand::IntakeUntilSecured { timeout } => {
                self.set_voltage(MAX_VOLTAGE);
                let deadline = Instant::now() + timeout;
                while !self.ball_present() {
                    if Instant::now() >= deadline {
                        debug!("No ball secured within {:?}", timeout);
                        self.set_voltage(0);
                        return Outcome::TimedOut;
                    }
                    sleep(SENSOR_POLL_PERIOD).await;
                }
                sleep(SECURE_DELAY).await;
                self.set_voltage(0);
                return Outcome::Settled;
            }
        }
        Outcome::Completed
    }
}

impl Actor<Intakes> {
    pub fn intake(&self) -> CommandId {
        self.submit(IntakeCommand::Intake)
    }

    pub fn outtake(&self) -> CommandId {
        self.submit(IntakeCommand::Outtake)
    }

    pub fn stop(&self) -> CommandId {
        self.submit(IntakeCommand::Stop)
    }

    pub async fn intake_for(&self, duration: Duration) -> Outcome {
        self.run(IntakeCommand::IntakeFor(duration)).await
    }

    pub async fn secure_ball(&self, timeout: Duration) -> Outcome {
        self.run(IntakeCommand::IntakeUntilSecured { timeout }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::PidGains;
    use crate::motor::Gearset;
    use crate::sim::{SimAnalog, SimMotor};

    fn intakes() -> (Actor<Intakes>, Arc<MotorControlUnit>, SimAnalog) {
        let unit = |port| {
            Arc::new(MotorControlUnit::new(
                Box::new(SimMotor::new(port, Gearset::Green)),
                PidGains::default(),
                30,
            ))
        };
        let left = unit(1);
        let sensor = SimAnalog::new(BALL_PRESENT_BELOW + 500);
        let actor = Actor::spawn(Intakes::new(
            Arc::clone(&left),
            unit(2),
            Arc::new(sensor.clone()),
        ));
        (actor, left, sensor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_intake_and_stop() {
        let (actor, left, _sensor) = intakes();
        actor.wait(actor.intake()).await;
        assert_eq!(left.target_voltage(), MAX_VOLTAGE);
        actor.wait(actor.outtake()).await;
        assert_eq!(left.target_voltage(), -MAX_VOLTAGE);
        actor.wait(actor.stop()).await;
        assert_eq!(left.target_voltage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intake_for_duration_stops() {
        let (actor, left, _sensor) = intakes();
        let start = Instant::now();
        assert_eq!(actor.intake_for(Duration::from_millis(250)).await, Outcome::Completed);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(left.target_voltage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_ball_times_out_without_ball() {
        let (actor, left, _sensor) = intakes();
        let outcome = actor.secure_ball(Duration::from_millis(200)).await;
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(left.target_voltage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_ball_settles_when_seen() {
        let (actor, _left, sensor) = intakes();
        let id = actor.submit(IntakeCommand::IntakeUntilSecured {
            timeout: Duration::from_secs(2),
        });
        sleep(Duration::from_millis(100)).await;
        sensor.set(BALL_PRESENT_BELOW - 500);
        assert_eq!(actor.wait(id).await, Outcome::Settled);
    }
}
