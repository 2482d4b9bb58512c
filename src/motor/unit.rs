// Per-motor control unit
//
// Owns one motor device and turns the most recent target into a device
// command once per scheduler tick: voltage mode runs the velocity PID and the
// slew limiter, velocity mode forwards the target to the device controller.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::device::{driver_input_to_voltage, BrakeMode, Gearset, MotorDevice, MotorMode};
use crate::config::MAX_VOLTAGE;
use crate::control::{slew_limit, Pid, PidGains};
use crate::error::Result;

/// A requested motor target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Voltage(i32),
    Velocity(i32),
}

/// Point-in-time view of a control unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotorSnapshot {
    pub port: u8,
    pub mode: MotorMode,
    pub target_voltage: i32,
    pub target_velocity: i32,
    pub output_voltage: i32,
    pub actual_velocity: Option<f64>,
    pub slew_enabled: bool,
    pub velocity_pid_enabled: bool,
    pub driver_control: bool,
}

/// Mediates every command to one motor
///
/// Shared as `Arc<MotorControlUnit>` between the scheduler and the mechanism
/// that drives it. All state lives behind one lock so a tick never observes a
/// half-applied target.
pub struct MotorControlUnit {
    port: u8,
    gearset: Gearset,
    state: Mutex<UnitState>,
}

struct UnitState {
    device: Box<dyn MotorDevice>,
    mode: MotorMode,
    pid: Pid,
    velocity_pid_enabled: bool,
    slew_enabled: bool,
    slew_rate: i32,
    driver_control: bool,
    target_voltage: i32,
    prev_target_voltage: i32,
    target_velocity: i32,
    output_voltage: i32,
    log_output: bool,
}

impl MotorControlUnit {
    /// Wrap a device; velocity PID and slew start enabled
    pub fn new(device: Box<dyn MotorDevice>, gains: PidGains, slew_rate: i32) -> Self {
        let port = device.port();
        let gearset = device.gearset();
        debug!("Motor control unit created on port {}", port);
        Self {
            port,
            gearset,
            state: Mutex::new(UnitState {
                device,
                mode: MotorMode::Voltage,
                pid: Pid::new(gains),
                velocity_pid_enabled: true,
                slew_enabled: true,
                slew_rate: slew_rate.abs(),
                driver_control: true,
                target_voltage: 0,
                prev_target_voltage: 0,
                target_velocity: 0,
                output_voltage: 0,
                log_output: false,
            }),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn gearset(&self) -> Gearset {
        self.gearset
    }

    fn state(&self) -> MutexGuard<'_, UnitState> {
        // A panic inside a tick leaves the state consistent enough to keep driving
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a target in the current mode, converting through the gearset when
    /// the target kind and the mode differ
    pub fn set_target(&self, target: Target) {
        let mut state = self.state();
        match (state.mode, target) {
            (MotorMode::Voltage, Target::Voltage(mv)) => state.request_voltage(mv),
            (MotorMode::Voltage, Target::Velocity(rpm)) => {
                let mv = self.gearset.velocity_to_voltage(rpm);
                state.request_voltage(mv);
            }
            (MotorMode::Velocity, Target::Velocity(rpm)) => {
                state.target_velocity = clamp_velocity(self.gearset, rpm);
            }
            (MotorMode::Velocity, Target::Voltage(mv)) => {
                state.target_velocity = self.gearset.voltage_to_velocity(mv);
            }
        }
    }

    pub fn set_voltage(&self, millivolts: i32) {
        self.set_target(Target::Voltage(millivolts));
    }

    pub fn set_velocity(&self, rpm: i32) {
        self.set_target(Target::Velocity(rpm));
    }

    /// Driver pass-through, ignored while a motion primitive owns the motor
    ///
    /// Returns whether the input was applied.
    pub fn driver_move(&self, value: i32) -> bool {
        let mut state = self.state();
        if !state.driver_control {
            trace!("Port {} ignoring driver input {}", self.port, value);
            return false;
        }
        let mv = driver_input_to_voltage(value);
        match state.mode {
            MotorMode::Voltage => state.request_voltage(mv),
            MotorMode::Velocity => state.target_velocity = self.gearset.voltage_to_velocity(mv),
        }
        true
    }

    pub fn allow_driver_control(&self) {
        self.state().driver_control = true;
    }

    pub fn disallow_driver_control(&self) {
        self.state().driver_control = false;
    }

    pub fn driver_control_allowed(&self) -> bool {
        self.state().driver_control
    }

    /// Switch modes; both targets are cleared so the new mode starts at rest
    pub fn set_mode(&self, mode: MotorMode) {
        let mut state = self.state();
        if state.mode == mode {
            return;
        }
        debug!("Port {} switching to {:?} mode", self.port, mode);
        state.mode = mode;
        state.target_voltage = 0;
        state.prev_target_voltage = 0;
        state.target_velocity = 0;
        state.pid.reset();
    }

    pub fn mode(&self) -> MotorMode {
        self.state().mode
    }

    pub fn enable_slew(&self) {
        self.state().slew_enabled = true;
    }

    pub fn disable_slew(&self) {
        self.state().slew_enabled = false;
    }

    /// Slew rate in mV/ms
    pub fn set_slew_rate(&self, rate: i32) {
        self.state().slew_rate = rate.abs();
    }

    pub fn enable_velocity_pid(&self) {
        self.state().velocity_pid_enabled = true;
    }

    pub fn disable_velocity_pid(&self) {
        let mut state = self.state();
        state.velocity_pid_enabled = false;
        state.pid.reset();
    }

    pub fn set_pid(&self, gains: PidGains) {
        let mut state = self.state();
        state.pid.set_gains(gains);
        state.pid.reset();
    }

    pub fn pid_gains(&self) -> PidGains {
        self.state().pid.gains()
    }

    pub fn set_brake_mode(&self, mode: BrakeMode) -> Result<()> {
        self.state().device.set_brake_mode(mode)
    }

    pub fn set_reversed(&self, reversed: bool) -> Result<()> {
        self.state().device.set_reversed(reversed)
    }

    pub fn is_reversed(&self) -> bool {
        self.state().device.is_reversed()
    }

    pub fn tare_position(&self) -> Result<()> {
        self.state().device.tare_position()
    }

    pub fn position(&self) -> Result<f64> {
        self.state().device.position()
    }

    pub fn actual_velocity(&self) -> Result<f64> {
        self.state().device.actual_velocity()
    }

    pub fn actual_voltage(&self) -> Result<f64> {
        self.state().device.actual_voltage()
    }

    /// Last voltage written to the device
    pub fn output_voltage(&self) -> i32 {
        self.state().output_voltage
    }

    pub fn target_voltage(&self) -> i32 {
        self.state().target_voltage
    }

    pub fn target_velocity(&self) -> i32 {
        self.state().target_velocity
    }

    /// Log every computed output at debug level
    pub fn set_output_logging(&self, enabled: bool) {
        self.state().log_output = enabled;
    }

    /// Write a voltage straight to the device, bypassing targets and slew
    ///
    /// Only meaningful while the unit is unregistered from the scheduler,
    /// otherwise the next tick overwrites it.
    pub fn write_direct_voltage(&self, millivolts: i32) -> Result<()> {
        let mut state = self.state();
        let mv = millivolts.clamp(-MAX_VOLTAGE, MAX_VOLTAGE);
        state.device.set_voltage(mv)?;
        state.output_voltage = mv;
        Ok(())
    }

    /// One control tick, `delta_ms` after the previous one
    pub fn step(&self, delta_ms: u64) {
        let mut state = self.state();
        match state.mode {
            MotorMode::Voltage => {
                let voltage = state.control_voltage(self.port, self.gearset, delta_ms);
                match state.device.set_voltage(voltage) {
                    Ok(()) => {
                        state.output_voltage = voltage;
                        // Only a target that reached the device counts as held
                        state.prev_target_voltage = state.target_voltage;
                    }
                    Err(e) => warn!("Port {} voltage write failed: {}", self.port, e),
                }
                if state.log_output {
                    debug!(
                        "Port {} target {} mV output {} mV",
                        self.port, state.target_voltage, state.output_voltage
                    );
                }
            }
            MotorMode::Velocity => {
                let rpm = state.target_velocity;
                match state.device.set_velocity(rpm) {
                    Ok(()) => state.output_voltage = self.gearset.velocity_to_voltage(rpm),
                    Err(e) => warn!("Port {} velocity write failed: {}", self.port, e),
                }
            }
        }
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        let state = self.state();
        MotorSnapshot {
            port: self.port,
            mode: state.mode,
            target_voltage: state.target_voltage,
            target_velocity: state.target_velocity,
            output_voltage: state.output_voltage,
            actual_velocity: state.device.actual_velocity().ok(),
            slew_enabled: state.slew_enabled,
            velocity_pid_enabled: state.velocity_pid_enabled,
            driver_control: state.driver_control,
        }
    }
}

impl UnitState {
    fn request_voltage(&mut self, millivolts: i32) {
        self.target_voltage = millivolts.clamp(-MAX_VOLTAGE, MAX_VOLTAGE);
    }

    fn control_voltage(&mut self, port: u8, gearset: Gearset, delta_ms: u64) -> i32 {
        let target = self.target_voltage;
        let mut requested = target;

        // The PID only engages once a target has held for a full tick
        if self.velocity_pid_enabled && target == self.prev_target_voltage {
            match self.device.actual_velocity() {
                Ok(actual) => {
                    let desired = gearset.voltage_to_velocity(target) as f64;
                    let correction = self.pid.update(desired, actual);
                    requested = (target as f64 + correction)
                        .round()
                        .clamp(-MAX_VOLTAGE as f64, MAX_VOLTAGE as f64)
                        as i32;
                }
                Err(e) => warn!("Port {} velocity read failed: {}", port, e),
            }
        }

        if self.slew_enabled {
            let max_step = self.slew_rate as f64 * delta_ms as f64;
            requested = slew_limit(self.output_voltage as f64, requested as f64, max_step) as i32;
        }
        requested
    }
}

fn clamp_velocity(gearset: Gearset, rpm: i32) -> i32 {
    let limit = gearset.full_scale_velocity();
    rpm.clamp(-limit, limit)
}
