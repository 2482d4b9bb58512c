// Motor control module
//
// Provides:
// - The motor device seam, gearsets and brake modes
// - Per-motor control units (slew limiting, velocity PID, driver gating)
// - The fixed-period scheduler that steps every registered unit

mod device;
mod scheduler;
mod unit;

pub use device::{driver_input_to_voltage, BrakeMode, Gearset, MotorDevice, MotorMode};
pub use scheduler::MotorScheduler;
pub use unit::{MotorControlUnit, MotorSnapshot, Target};
