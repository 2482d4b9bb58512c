// Fixed-period motor scheduler
//
// One background task steps every registered control unit each period. The
// registry lock is released before any unit is stepped, so the task never
// holds two locks at once.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::unit::MotorControlUnit;
use crate::config::MOTOR_LOOP_PERIOD;

/// Steps registered motor control units at a fixed rate
pub struct MotorScheduler {
    units: Arc<Mutex<Vec<Arc<MotorControlUnit>>>>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MotorScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorScheduler {
    pub fn new() -> Self {
        Self::with_period(MOTOR_LOOP_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            units: Arc::new(Mutex::new(Vec::new())),
            period,
            task: Mutex::new(None),
        }
    }

    fn units(&self) -> MutexGuard<'_, Vec<Arc<MotorControlUnit>>> {
        lock(&self.units)
    }

    /// Add a unit; registering twice is a no-op
    ///
    /// Returns whether the unit was newly added.
    pub fn register(&self, unit: &Arc<MotorControlUnit>) -> bool {
        let mut units = self.units();
        if units.iter().any(|u| Arc::ptr_eq(u, unit)) {
            return false;
        }
        debug!("Registering motor on port {}", unit.port());
        units.push(Arc::clone(unit));
        true
    }

    /// Remove a unit; removing an absent unit is a no-op
    pub fn unregister(&self, unit: &Arc<MotorControlUnit>) -> bool {
        let mut units = self.units();
        let before = units.len();
        units.retain(|u| !Arc::ptr_eq(u, unit));
        let removed = units.len() != before;
        if removed {
            debug!("Unregistered motor on port {}", unit.port());
        }
        removed
    }

    pub fn is_registered(&self, unit: &Arc<MotorControlUnit>) -> bool {
        self.units().iter().any(|u| Arc::ptr_eq(u, unit))
    }

    pub fn registered_ports(&self) -> Vec<u8> {
        self.units().iter().map(|u| u.port()).collect()
    }

    /// Step every registered unit once
    pub fn tick(&self, delta_ms: u64) {
        step_all(&self.units, delta_ms);
    }

    /// Spawn the background task if it is not already running
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        info!("Starting motor scheduler ({:?} period)", self.period);
        let units = Arc::clone(&self.units);
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let delta_ms = now.duration_since(last).as_millis() as u64;
                last = now;
                step_all(&units, delta_ms);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            info!("Stopping motor scheduler");
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for MotorScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn step_all(units: &Mutex<Vec<Arc<MotorControlUnit>>>, delta_ms: u64) {
    let snapshot: Vec<Arc<MotorControlUnit>> = lock(units).clone();
    for unit in snapshot {
        unit.step(delta_ms);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::PidGains;
    use crate::motor::Gearset;
    use crate::sim::SimMotor;

    fn unit(port: u8) -> (Arc<MotorControlUnit>, SimMotor) {
        let motor = SimMotor::new(port, Gearset::Green);
        let unit = MotorControlUnit::new(Box::new(motor.clone()), PidGains::default(), 30);
        unit.disable_velocity_pid();
        unit.disable_slew();
        (Arc::new(unit), motor)
    }

    #[test]
    fn test_register_is_idempotent() {
        let scheduler = MotorScheduler::new();
        let (a, _) = unit(1);
        assert!(scheduler.register(&a));
        assert!(!scheduler.register(&a));
        assert_eq!(scheduler.registered_ports(), vec![1]);

        assert!(scheduler.unregister(&a));
        assert!(!scheduler.unregister(&a));
        assert!(scheduler.registered_ports().is_empty());
    }

    #[test]
    fn test_tick_only_steps_registered_units() {
        let scheduler = MotorScheduler::new();
        let (a, motor_a) = unit(1);
        let (b, motor_b) = unit(2);
        scheduler.register(&a);
        a.set_voltage(5_000);
        b.set_voltage(5_000);

        scheduler.tick(10);
        assert_eq!(motor_a.commanded_voltage(), 5_000);
        assert_eq!(motor_b.commanded_voltage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_drives_units() {
        let scheduler = MotorScheduler::new();
        let (a, motor) = unit(3);
        scheduler.register(&a);
        scheduler.start();
        assert!(scheduler.is_running());

        a.set_voltage(7_000);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(motor.commanded_voltage(), 7_000);

        scheduler.stop();
        tokio::task::yield_now().await;
        assert!(!scheduler.is_running());

        a.set_voltage(-7_000);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(motor.commanded_voltage(), 7_000);
    }
}
