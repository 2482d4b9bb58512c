// Hardware seam for a single smart motor
//
// Voltages are in mV, velocities in RPM at the motor output and positions in
// degrees of output rotation.

use serde::{Deserialize, Serialize};

use crate::config::{MAX_DRIVER_INPUT, MAX_VOLTAGE};
use crate::error::Result;

/// Internal cartridge of a motor, which sets its rated speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gearset {
    /// 100 RPM
    Red,
    /// 200 RPM
    #[default]
    Green,
    /// 600 RPM
    Blue,
}

impl Gearset {
    pub const fn rated_rpm(self) -> i32 {
        match self {
            Gearset::Red => 100,
            Gearset::Green => 200,
            Gearset::Blue => 600,
        }
    }

    /// Velocity reached at full voltage
    ///
    /// Cartridges spin about 20% past their rated speed unloaded, so full
    /// voltage maps a bit higher than `rated_rpm`.
    pub const fn full_scale_velocity(self) -> i32 {
        match self {
            Gearset::Red => 120,
            Gearset::Green => 240,
            Gearset::Blue => 720,
        }
    }

    /// Map a voltage onto the velocity it should produce
    pub fn voltage_to_velocity(self, millivolts: i32) -> i32 {
        let full = self.full_scale_velocity();
        rescale(millivolts, MAX_VOLTAGE, full)
    }

    /// Map a velocity onto the voltage that should produce it
    pub fn velocity_to_voltage(self, rpm: i32) -> i32 {
        let full = self.full_scale_velocity();
        rescale(rpm, full, MAX_VOLTAGE)
    }
}

/// Linear map of `[-from, from]` onto `[-to, to]`, saturating at the ends
fn rescale(value: i32, from: i32, to: i32) -> i32 {
    let value = value.clamp(-from, from) as i64;
    let scaled = ((value + from as i64) * (2 * to as i64)) / (2 * from as i64) - to as i64;
    scaled as i32
}

/// Map driver input in `[-127, 127]` onto a voltage
pub fn driver_input_to_voltage(value: i32) -> i32 {
    rescale(value, MAX_DRIVER_INPUT, MAX_VOLTAGE)
}

/// What a motor does when commanded to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrakeMode {
    #[default]
    Coast,
    Brake,
    Hold,
}

/// Which target the control unit forwards to the device every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorMode {
    /// Voltage with the unit's own slew limiting and velocity PID
    #[default]
    Voltage,
    /// Velocity tracked by the device's own controller
    Velocity,
}

/// A motor as seen by its control unit
///
/// Implementations apply the reversed flag themselves: positive commands and
/// readings always mean "forward" for the mechanism.
pub trait MotorDevice: Send {
    fn port(&self) -> u8;

    fn gearset(&self) -> Gearset;

    fn set_voltage(&mut self, millivolts: i32) -> Result<()>;

    fn set_velocity(&mut self, rpm: i32) -> Result<()>;

    fn actual_velocity(&self) -> Result<f64>;

    fn actual_voltage(&self) -> Result<f64>;

    /// Position in degrees since the last tare
    fn position(&self) -> Result<f64>;

    fn tare_position(&mut self) -> Result<()>;

    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<()>;

    fn is_reversed(&self) -> bool;

    fn set_reversed(&mut self, reversed: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_velocity_mapping() {
        assert_eq!(Gearset::Green.voltage_to_velocity(12_000), 240);
        assert_eq!(Gearset::Green.voltage_to_velocity(0), 0);
        assert_eq!(Gearset::Green.voltage_to_velocity(-6_000), -120);
        assert_eq!(Gearset::Blue.voltage_to_velocity(12_000), 720);
        assert_eq!(Gearset::Red.velocity_to_voltage(60), 6_000);
    }

    #[test]
    fn test_mapping_saturates() {
        assert_eq!(Gearset::Green.voltage_to_velocity(50_000), 240);
        assert_eq!(Gearset::Green.velocity_to_voltage(-1_000), -12_000);
    }

    #[test]
    fn test_driver_input_scaling() {
        assert_eq!(driver_input_to_voltage(127), 12_000);
        assert_eq!(driver_input_to_voltage(-127), -12_000);
        assert_eq!(driver_input_to_voltage(0), 0);
    }
}
