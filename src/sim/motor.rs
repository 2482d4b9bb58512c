// Simulated smart motor
//
// Velocity follows the commanded velocity through a first-order lag. Voltage
// commands map onto velocity through the gearset's full-scale velocity.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::motor::{BrakeMode, Gearset, MotorDevice};

// Time constant of the velocity response
const RESPONSE_TIME: Duration = Duration::from_millis(40);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Voltage(i32),
    Velocity(i32),
}

#[derive(Debug)]
struct SimMotorState {
    command: Command,
    // Physical state, independent of the reversed flag
    velocity: f64,
    position: f64,
    tare: f64,
    reversed: bool,
    brake_mode: BrakeMode,
    stalled: bool,
    // Fraction of the commanded velocity the rotor reaches
    efficiency: f64,
    fail_writes: bool,
    fail_reads: bool,
}

/// Cloneable handle onto one simulated motor
#[derive(Debug, Clone)]
pub struct SimMotor {
    port: u8,
    gearset: Gearset,
    state: Arc<Mutex<SimMotorState>>,
}

impl SimMotor {
    pub fn new(port: u8, gearset: Gearset) -> Self {
        Self {
            port,
            gearset,
            state: Arc::new(Mutex::new(SimMotorState {
                command: Command::Voltage(0),
                velocity: 0.0,
                position: 0.0,
                tare: 0.0,
                reversed: false,
                brake_mode: BrakeMode::Coast,
                stalled: false,
                efficiency: 1.0,
                fail_writes: false,
                fail_reads: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimMotorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Integrate the motor over `dt`
    pub fn advance(&self, dt: Duration) {
        let mut state = self.state();
        let commanded = match state.command {
            Command::Voltage(mv) => self.gearset.voltage_to_velocity(mv),
            Command::Velocity(rpm) => rpm,
        };
        let commanded = commanded as f64 * state.efficiency;
        let target = if state.reversed { -commanded } else { commanded };

        if state.stalled {
            state.velocity = 0.0;
        } else {
            let alpha = (dt.as_secs_f64() / RESPONSE_TIME.as_secs_f64()).min(1.0);
            state.velocity += (target - state.velocity) * alpha;
        }
        // RPM to degrees per second
        state.position += state.velocity * 6.0 * dt.as_secs_f64();
    }

    /// Physical velocity in RPM, ignoring the reversed flag
    pub fn velocity(&self) -> f64 {
        self.state().velocity
    }

    /// Physical position in degrees, ignoring the reversed flag and tare
    pub fn physical_position(&self) -> f64 {
        self.state().position
    }

    /// Last commanded voltage, in the motor's own frame
    pub fn commanded_voltage(&self) -> i32 {
        match self.state().command {
            Command::Voltage(mv) => mv,
            Command::Velocity(rpm) => self.gearset.velocity_to_voltage(rpm),
        }
    }

    /// Last commanded velocity, if the motor is in velocity mode
    pub fn commanded_velocity(&self) -> Option<i32> {
        match self.state().command {
            Command::Velocity(rpm) => Some(rpm),
            Command::Voltage(_) => None,
        }
    }

    pub fn brake_mode(&self) -> BrakeMode {
        self.state().brake_mode
    }

    /// Hold the rotor still regardless of command
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Load the rotor so it only reaches `fraction` of its commanded velocity
    pub fn set_efficiency(&self, fraction: f64) {
        self.state().efficiency = fraction.clamp(0.0, 1.0);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    fn write(&self, command: Command) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(Error::motor(self.port, "simulated write fault"));
        }
        state.command = command;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&SimMotorState) -> T) -> Result<T> {
        let state = self.state();
        if state.fail_reads {
            return Err(Error::motor(self.port, "simulated read fault"));
        }
        Ok(f(&state))
    }
}

fn directed(state: &SimMotorState, value: f64) -> f64 {
    if state.reversed { -value } else { value }
}

impl MotorDevice for SimMotor {
    fn port(&self) -> u8 {
        self.port
    }

    fn gearset(&self) -> Gearset {
        self.gearset
    }

    fn set_voltage(&mut self, millivolts: i32) -> Result<()> {
        self.write(Command::Voltage(millivolts))
    }

    fn set_velocity(&mut self, rpm: i32) -> Result<()> {
        self.write(Command::Velocity(rpm))
    }

    fn actual_velocity(&self) -> Result<f64> {
        self.read(|s| directed(s, s.velocity))
    }

    fn actual_voltage(&self) -> Result<f64> {
        let gearset = self.gearset;
        self.read(|s| match s.command {
            Command::Voltage(mv) => mv as f64,
            Command::Velocity(rpm) => gearset.velocity_to_voltage(rpm) as f64,
        })
    }

    fn position(&self) -> Result<f64> {
        self.read(|s| directed(s, s.position - s.tare))
    }

    fn tare_position(&mut self) -> Result<()> {
        let mut state = self.state();
        state.tare = state.position;
        Ok(())
    }

    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<()> {
        self.state().brake_mode = mode;
        Ok(())
    }

    fn is_reversed(&self) -> bool {
        self.state().reversed
    }

    fn set_reversed(&mut self, reversed: bool) -> Result<()> {
        self.state().reversed = reversed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_converges_to_command() {
        let mut motor = SimMotor::new(1, Gearset::Green);
        motor.set_velocity(100).unwrap();
        for _ in 0..100 {
            motor.advance(Duration::from_millis(5));
        }
        assert!((motor.velocity() - 100.0).abs() < 0.01);
        assert!(motor.position().unwrap() > 0.0);
    }

    #[test]
    fn test_reversed_negates_motion_and_readings() {
        let mut motor = SimMotor::new(1, Gearset::Green);
        motor.set_reversed(true).unwrap();
        motor.set_voltage(12_000).unwrap();
        for _ in 0..100 {
            motor.advance(Duration::from_millis(5));
        }
        assert!(motor.velocity() < -239.0);
        assert!(motor.actual_velocity().unwrap() > 239.0);
    }

    #[test]
    fn test_loaded_motor_falls_short() {
        let mut motor = SimMotor::new(1, Gearset::Green);
        motor.set_efficiency(0.8);
        motor.set_velocity(100).unwrap();
        for _ in 0..100 {
            motor.advance(Duration::from_millis(5));
        }
        assert!((motor.velocity() - 80.0).abs() < 0.01);
    }

    #[test]
    fn test_write_fault() {
        let mut motor = SimMotor::new(4, Gearset::Blue);
        motor.set_fail_writes(true);
        assert!(matches!(motor.set_voltage(100), Err(Error::Motor { port: 4, .. })));
    }
}
