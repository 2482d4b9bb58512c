// Two-stage ball indexer

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::warn;

use super::actor::{Actor, CommandId, Mechanism, Outcome};
use super::{BALL_PRESENT_BELOW, SENSOR_POLL_PERIOD};
use crate::config::MAX_VOLTAGE;
use crate::motor::{BrakeMode, MotorControlUnit};
use crate::sensors::AnalogSensor;

// Lower roller voltage when there is no backboard to score against
const NO_BACKBOARD_VOLTAGE: i32 = 6_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerCommand {
    Index,
    IndexNoBackboard,
    /// Eject the ball out of the back
    Filter,
    RunUpper,
    RunLower,
    /// Index until a ball reaches the top sensor or the timeout passes
    IndexUntilTop { timeout: Duration },
    /// Back the top ball off and push it through again
    FixBall,
    Stop,
}

pub struct Indexer {
    upper: Arc<MotorControlUnit>,
    lower: Arc<MotorControlUnit>,
    top_sensor: Arc<dyn AnalogSensor>,
}

impl Indexer {
    pub fn new(
        upper: Arc<MotorControlUnit>,
        lower: Arc<MotorControlUnit>,
        top_sensor: Arc<dyn AnalogSensor>,
    ) -> Self {
        for motor in [&upper, &lower] {
            motor.disable_velocity_pid();
            motor.disable_slew();
            if let Err(e) = motor.set_brake_mode(BrakeMode::Hold) {
                warn!("Indexer motor {} brake mode not set: {}", motor.port(), e);
            }
        }
        Self {
            upper,
            lower,
            top_sensor,
        }
    }

    fn set(&self, upper: i32, lower: i32) {
        self.upper.set_voltage(upper);
        self.lower.set_voltage(lower);
    }

    fn ball_at_top(&self) -> bool {
        match self.top_sensor.value() {
            Ok(value) => value < BALL_PRESENT_BELOW,
            Err(e) => {
                warn!("Top sensor unreadable: {}", e);
                false
            }
        }
    }
}

impl Mechanism for Indexer {
    type Command = IndexerCommand;
    const NAME: &'static str = "indexer";
    const IDLE_DELAY: Duration = Duration::from_millis(7);

    async fn execute(&self, command: IndexerCommand) -> Outcome {
        match command {
            IndexerCommand::Index => self.set(MAX_VOLTAGE, MAX_VOLTAGE),
            IndexerCommand::IndexNoBackboard => self.set(MAX_VOLTAGE, NO_BACKBOARD_VOLTAGE),
            IndexerCommand::Filter => self.set(-MAX_VOLTAGE, MAX_VOLTAGE),
            IndexerCommand::RunUpper => self.upper.set_voltage(MAX_VOLTAGE),
            IndexerCommand::RunLower => self.lower.set_voltage(MAX_VOLTAGE),
            IndexerCommand::Stop => self.set(0, 0),
            IndexerCommand::FixBall => {
                self.upper.set_voltage(-MAX_VOLTAGE);
                sleep(Duration::from_millis(250)).await;
                self.upper.set_voltage(MAX_VOLTAGE);
                sleep(Duration::from_millis(500)).await;
                self.upper.set_voltage(0);
            }
            IndexerCommand::IndexUntilTop { timeout } => {
                let deadline = Instant::now() + timeout;
                self.set(MAX_VOLTAGE, MAX_VOLTAGE);
                let outcome = loop {
                    if self.ball_at_top() {
                        break Outcome::Settled;
                    }
                    if Instant::now() >= deadline {
                        break Outcome::TimedOut;
                    }
                    sleep(SENSOR_POLL_PERIOD).await;
                };
                self.set(0, 0);
                return outcome;
            }
        }
        Outcome::Completed
    }
}

impl Actor<Indexer> {
    pub fn index(&self) -> CommandId {
        self.submit(IndexerCommand::Index)
    }

    pub fn filter(&self) -> CommandId {
        self.submit(IndexerCommand::Filter)
    }

    pub fn stop(&self) -> CommandId {
        self.submit(IndexerCommand::Stop)
    }

    pub async fn index_until_top(&self, timeout: Duration) -> Outcome {
        self.run(IndexerCommand::IndexUntilTop { timeout }).await
    }

    pub async fn fix_ball(&self) -> Outcome {
        self.run(IndexerCommand::FixBall).await
    }
}
