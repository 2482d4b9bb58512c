// Simulated sensors with fault injection

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::sensors::{AnalogSensor, EncoderDevice, HeadingSensor};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct SimEncoder {
    ticks: Arc<Mutex<f64>>,
    failing: Arc<AtomicBool>,
}

impl SimEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ticks: f64) {
        *lock(&self.ticks) = ticks;
    }

    pub fn add(&self, ticks: f64) {
        *lock(&self.ticks) += ticks;
    }

    pub fn position_ticks(&self) -> f64 {
        *lock(&self.ticks)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl EncoderDevice for SimEncoder {
    fn ticks(&self) -> Result<f64> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::sensor("sim encoder", "simulated read fault"));
        }
        Ok(*lock(&self.ticks))
    }
}

/// Inertial sensor reporting clockwise degrees in [0, 360)
#[derive(Debug, Clone, Default)]
pub struct SimImu {
    degrees: Arc<Mutex<f64>>,
    failing: Arc<AtomicBool>,
}

impl SimImu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heading; any angle is normalized into [0, 360)
    pub fn set_heading(&self, degrees: f64) {
        *lock(&self.degrees) = degrees.rem_euclid(360.0);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl HeadingSensor for SimImu {
    fn heading(&self) -> Result<f64> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::sensor("sim imu", "simulated read fault"));
        }
        Ok(*lock(&self.degrees))
    }
}

#[derive(Debug, Clone)]
pub struct SimAnalog {
    value: Arc<AtomicI32>,
}

impl SimAnalog {
    pub fn new(value: i32) -> Self {
        Self {
            value: Arc::new(AtomicI32::new(value)),
        }
    }

    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl AnalogSensor for SimAnalog {
    fn value(&self) -> Result<i32> {
        Ok(self.value.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imu_normalizes_heading() {
        let imu = SimImu::new();
        imu.set_heading(-90.0);
        assert_eq!(imu.heading().unwrap(), 270.0);
        imu.set_heading(725.0);
        assert!((imu.heading().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_encoder_fault() {
        let encoder = SimEncoder::new();
        encoder.set_failing(true);
        assert!(encoder.ticks().is_err());
    }
}
