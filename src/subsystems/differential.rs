// Differential sorter and brake
//
// Two motors geared into a differential: running them opposite sorts balls,
// running them together moves the brake, whose position is read from a
// potentiometer.

use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::actor::{Actor, CommandId, Mechanism, Outcome};
use super::{BRAKE_LOWERED, BRAKE_RAISED, BRAKE_TIMEOUT, SENSOR_POLL_PERIOD};
use crate::config::MAX_VOLTAGE;
use crate::motor::{BrakeMode, MotorControlUnit};
use crate::sensors::AnalogSensor;

// Hold voltage removed per poll once the brake is up, so it does not slip
const BRAKE_RAMP_STEP: i32 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferentialCommand {
    Index,
    Filter,
    RaiseBrake,
    LowerBrake,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Travel {
    Up,
    Down,
}

pub struct Differential {
    first: Arc<MotorControlUnit>,
    second: Arc<MotorControlUnit>,
    potentiometer: Arc<dyn AnalogSensor>,
}

impl Differential {
    pub fn new(
        first: Arc<MotorControlUnit>,
        second: Arc<MotorControlUnit>,
        potentiometer: Arc<dyn AnalogSensor>,
    ) -> Self {
        for motor in [&first, &second] {
            motor.disable_velocity_pid();
            motor.disable_slew();
            if let Err(e) = motor.set_brake_mode(BrakeMode::Hold) {
                warn!("Differential motor {} brake mode not set: {}", motor.port(), e);
            }
        }
        Self {
            first,
            second,
            potentiometer,
        }
    }

    fn set(&self, first: i32, second: i32) {
        self.first.set_voltage(first);
        self.second.set_voltage(second);
    }

    fn brake_reached(&self, travel: Travel) -> bool {
        match self.potentiometer.value() {
            Ok(value) => match travel {
                Travel::Up => value >= BRAKE_RAISED,
                Travel::Down => value <= BRAKE_LOWERED,
            },
            Err(e) => {
                warn!("Brake potentiometer unreadable: {}", e);
                false
            }
        }
    }

    /// Drive the brake until the potentiometer limit or the timeout
    async fn move_brake(&self, travel: Travel) -> Outcome {
        let voltage = match travel {
            Travel::Up => MAX_VOLTAGE,
            Travel::Down => -MAX_VOLTAGE,
        };
        let deadline = Instant::now() + BRAKE_TIMEOUT;
        self.set(voltage, voltage);

        let outcome = loop {
            if self.brake_reached(travel) {
                break Outcome::Settled;
            }
            if Instant::now() >= deadline {
                warn!("Brake did not reach its {:?} limit", travel);
                break Outcome::TimedOut;
            }
            sleep(SENSOR_POLL_PERIOD).await;
        };

        if travel == Travel::Up {
            let mut hold = MAX_VOLTAGE;
            while hold > 0 {
                hold -= BRAKE_RAMP_STEP;
                self.set(hold.max(0), hold.max(0));
                sleep(SENSOR_POLL_PERIOD).await;
            }
        }
        self.set(0, 0);
        debug!("Brake {:?} finished: {:?}", travel, outcome);
        outcome
    }
}

impl Mechanism for Differential {
    type Command = DifferentialCommand;
    const NAME: &'static str = "differential";

    async fn execute(&self, command: DifferentialCommand) -> Outcome {
        match command {
            DifferentialCommand::Index => self.set(-MAX_VOLTAGE, MAX_VOLTAGE),
            DifferentialCommand::Filter => self.set(MAX_VOLTAGE, -MAX_VOLTAGE),
            DifferentialCommand::Stop => self.set(0, 0),
            DifferentialCommand::RaiseBrake => return self.move_brake(Travel::Up).await,
            DifferentialCommand::LowerBrake => return self.move_brake(Travel::Down).await,
        }
        Outcome::Completed
    }
}

impl Actor<Differential> {
    pub fn index(&self) -> CommandId {
        self.submit(DifferentialCommand::Index)
    }

    pub fn filter(&self) -> CommandId {
        self.submit(DifferentialCommand::Filter)
    }

    pub fn stop(&self) -> CommandId {
        self.submit(DifferentialCommand::Stop)
    }

    pub async fn raise_brake(&self) -> Outcome {
        self.run(DifferentialCommand::RaiseBrake).await
    }

    pub async fn lower_brake(&self) -> Outcome {
        self.run(DifferentialCommand::LowerBrake).await
    }
}
