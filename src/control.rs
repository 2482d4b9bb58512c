// Shared control primitives: PID with integrator reset, and slew limiting
use serde::{Deserialize, Serialize};

/// PID gains with an integrator ceiling
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Integrator magnitude beyond which the integrator is cleared
    pub i_max: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64, i_max: f64) -> Self {
        Self { kp, ki, kd, i_max }
    }
}

/// Discrete PID evaluated once per control tick
///
/// The integrator is cleared when the setpoint changes, when the error is
/// exactly zero, and when it grows past `i_max`.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    integral: f64,
    prev_error: f64,
    setpoint: Option<f64>,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: 0.0,
            setpoint: None,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.setpoint = None;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Returns the correction for one tick
    pub fn update(&mut self, setpoint: f64, measured: f64) -> f64 {
        let error = setpoint - measured;

        if self.setpoint != Some(setpoint) {
            self.integral = 0.0;
            self.prev_error = error;
            self.setpoint = Some(setpoint);
        } else if error == 0.0 || self.integral.abs() > self.gains.i_max {
            self.integral = 0.0;
        } else {
            self.integral += error;
        }

        let derivative = error - self.prev_error;
        self.prev_error = error;

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }
}

/// Limit how far `requested` may move away from `previous` in one step
///
/// Deceleration toward zero is never limited. A sign reversal restarts the
/// ramp from zero.
pub fn slew_limit(previous: f64, requested: f64, max_step: f64) -> f64 {
    let max_step = max_step.abs();
    if previous.signum() != requested.signum() && previous != 0.0 && requested != 0.0 {
        return requested.clamp(-max_step, max_step);
    }
    if requested.abs() <= previous.abs() {
        return requested;
    }
    let magnitude = requested.abs().min(previous.abs() + max_step);
    magnitude.copysign(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pid = Pid::new(PidGains::new(2.0, 0.0, 0.0, 100.0));
        assert_eq!(pid.update(10.0, 4.0), 12.0);
    }

    #[test]
    fn test_integrator_resets_on_setpoint_change() {
        let mut pid = Pid::new(PidGains::new(0.0, 1.0, 0.0, 1000.0));
        pid.update(10.0, 0.0);
        pid.update(10.0, 0.0);
        pid.update(10.0, 0.0);
        assert_eq!(pid.integral(), 20.0);

        pid.update(5.0, 0.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_integrator_clears_past_ceiling() {
        let mut pid = Pid::new(PidGains::new(0.0, 1.0, 0.0, 15.0));
        pid.update(10.0, 0.0); // setpoint latch
        pid.update(10.0, 0.0); // 10
        pid.update(10.0, 0.0); // 20
        assert_eq!(pid.integral(), 20.0);
        pid.update(10.0, 0.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_integrator_clears_at_zero_error() {
        let mut pid = Pid::new(PidGains::new(0.0, 1.0, 0.0, 100.0));
        pid.update(10.0, 0.0);
        pid.update(10.0, 5.0);
        assert_eq!(pid.integral(), 5.0);
        pid.update(10.0, 10.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_derivative_uses_previous_error() {
        let mut pid = Pid::new(PidGains::new(0.0, 0.0, 1.0, 100.0));
        assert_eq!(pid.update(10.0, 0.0), 0.0);
        assert_eq!(pid.update(10.0, 4.0), -4.0);
    }

    #[test]
    fn test_slew_limits_acceleration() {
        assert_eq!(slew_limit(0.0, 12000.0, 300.0), 300.0);
        assert_eq!(slew_limit(300.0, 12000.0, 300.0), 600.0);
        assert_eq!(slew_limit(-300.0, -12000.0, 300.0), -600.0);
    }

    #[test]
    fn test_slew_never_limits_deceleration() {
        assert_eq!(slew_limit(12000.0, 0.0, 300.0), 0.0);
        assert_eq!(slew_limit(-8000.0, -100.0, 300.0), -100.0);
    }

    #[test]
    fn test_slew_sign_reversal_ramps_from_zero() {
        assert_eq!(slew_limit(5000.0, -12000.0, 300.0), -300.0);
        assert_eq!(slew_limit(-5000.0, 100.0, 300.0), 100.0);
    }

    #[test]
    fn test_slew_step_property() {
        let max_step = 240.0;
        let targets = [12000.0, -12000.0, 500.0, 0.0, -7000.0, 11000.0];
        let mut output: f64 = 0.0;
        for target in targets {
            for _ in 0..100 {
                let next = slew_limit(output, target, max_step);
                let accelerating = next.abs() > output.abs() && next.signum() == output.signum();
                if accelerating && output != 0.0 {
                    assert!(next.abs() - output.abs() <= max_step + 1e-9);
                }
                if next.signum() != output.signum() && output != 0.0 && next != 0.0 {
                    assert!(next.abs() <= max_step);
                }
                output = next;
            }
        }
    }
}
