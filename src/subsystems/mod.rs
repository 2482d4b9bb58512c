// Robot mechanisms, each driven through its own command-queue actor
//
// Provides:
// - The generic actor and the Mechanism trait
// - Intake rollers, the two-stage indexer and the differential sorter
// - The chassis motion engine

mod actor;
pub mod chassis;
mod differential;
mod indexer;
mod intakes;

pub use actor::{Actor, CommandId, Mechanism, Outcome};
pub use chassis::{Chassis, ChassisCommand};
pub use differential::{Differential, DifferentialCommand};
pub use indexer::{Indexer, IndexerCommand};
pub use intakes::{IntakeCommand, Intakes};

use std::time::Duration;

// Line sensors read lower when a ball reflects the emitter
pub const BALL_PRESENT_BELOW: i32 = 2500;

// Brake potentiometer limits, raw ADC counts
pub const BRAKE_RAISED: i32 = 3950;
pub const BRAKE_LOWERED: i32 = 3470;
pub const BRAKE_TIMEOUT: Duration = Duration::from_secs(3);

// Poll period of sensor-bounded routines
const SENSOR_POLL_PERIOD: Duration = Duration::from_millis(10);
