// Pose estimator task
//
// Samples both drive encoders, the lateral encoder and the inertial sensor
// every cycle and folds them into the tracker. Readers copy the pose out
// under the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::tracker::{SensorSample, Tracker};
use super::{to_degrees, Pose};
use crate::config::{DriveGeometry, ODOMETRY_PERIOD};
use crate::error::Result;
use crate::sensors::{Encoder, HeadingSensor, ReferenceId};

/// Fused (x, y, heading) estimate running at a fixed period
pub struct PoseEstimator {
    shared: Arc<Shared>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    left: Arc<Encoder>,
    right: Arc<Encoder>,
    lateral: Arc<Encoder>,
    imu: Arc<dyn HeadingSensor>,
    state: Mutex<EstimatorState>,
    logging: AtomicBool,
}

struct EstimatorState {
    tracker: Tracker,
    references: Option<References>,
    // Bumped on every set_pose so a cycle straddling a reset is dropped
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct References {
    left: ReferenceId,
    right: ReferenceId,
    lateral: ReferenceId,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PoseEstimator {
    /// Build a stopped estimator at the origin
    pub fn new(
        geometry: DriveGeometry,
        left: Arc<Encoder>,
        right: Arc<Encoder>,
        lateral: Arc<Encoder>,
        imu: Arc<dyn HeadingSensor>,
    ) -> Self {
        let estimator = Self {
            shared: Arc::new(Shared {
                left,
                right,
                lateral,
                imu,
                state: Mutex::new(EstimatorState {
                    tracker: Tracker::new(geometry),
                    references: None,
                    generation: 0,
                }),
                logging: AtomicBool::new(false),
            }),
            period: ODOMETRY_PERIOD,
            task: Mutex::new(None),
        };
        estimator.set_pose(Pose::default());
        estimator
    }

    /// Spawn the estimator task if it is not already running
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!("Starting pose estimator ({:?} period)", self.period);
        let shared = Arc::clone(&self.shared);
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.cycle();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            info!("Stopping pose estimator");
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Teleport to `pose`; all zero references are re-acquired
    pub fn set_pose(&self, pose: Pose) {
        let old = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            state.references.take()
        };
        if let Some(old) = old {
            self.shared.left.release(old.left);
            self.shared.right.release(old.right);
            self.shared.lateral.release(old.lateral);
        }

        let references = References {
            left: self.shared.left.acquire_reference(),
            right: self.shared.right.acquire_reference(),
            lateral: self.shared.lateral.acquire_reference(),
        };
        let sample = match self.shared.sample(&references) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Sensor read failed while setting pose: {}", e);
                SensorSample::default()
            }
        };

        let mut state = lock(&self.shared.state);
        state.tracker.reset(pose, &sample);
        state.references = Some(references);
        debug!(
            "Pose set to ({:.2}, {:.2}, {:.1}°)",
            pose.x,
            pose.y,
            to_degrees(pose.heading)
        );
    }

    /// Run one estimation cycle immediately
    pub fn update(&self) {
        self.shared.cycle();
    }

    pub fn pose(&self) -> Pose {
        lock(&self.shared.state).tracker.pose()
    }

    /// Position (x, y) in inches
    pub fn position(&self) -> (f64, f64) {
        let pose = self.pose();
        (pose.x, pose.y)
    }

    pub fn heading_rad(&self) -> f64 {
        self.pose().heading
    }

    pub fn delta_theta_rad(&self) -> f64 {
        lock(&self.shared.state).tracker.delta_theta()
    }

    /// Emit a structured record every cycle
    pub fn start_logging(&self) {
        self.shared.logging.store(true, Ordering::Relaxed);
    }

    pub fn stop_logging(&self) {
        self.shared.logging.store(false, Ordering::Relaxed);
    }
}

impl Drop for PoseEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn sample(&self, references: &References) -> Result<SensorSample> {
        Ok(SensorSample {
            left_ticks: self.left.position(references.left)?,
            right_ticks: self.right.position(references.right)?,
            lateral_ticks: self.lateral.position(references.lateral)?,
            imu_degrees: self.imu.heading()?,
        })
    }

    fn cycle(&self) {
        let (references, generation) = {
            let state = lock(&self.state);
            (state.references, state.generation)
        };
        let Some(references) = references else {
            return;
        };

        let sample = match self.sample(&references) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Skipping odometry cycle: {}", e);
                return;
            }
        };

        let pose = {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return;
            }
            state.tracker.update(&sample)
        };

        if self.logging.load(Ordering::Relaxed) {
            info!(
                target: "odometry",
                x = pose.x,
                y = pose.y,
                heading_deg = to_degrees(pose.heading),
                "pose"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odometry::to_encoder_ticks;
    use crate::sim::{SimEncoder, SimImu};

    struct Rig {
        estimator: PoseEstimator,
        left: SimEncoder,
        right: SimEncoder,
        imu: SimImu,
    }

    fn rig() -> Rig {
        let left = SimEncoder::new();
        let right = SimEncoder::new();
        let lateral = SimEncoder::new();
        let imu = SimImu::new();
        let estimator = PoseEstimator::new(
            DriveGeometry::default(),
            Arc::new(Encoder::new("left", Box::new(left.clone()))),
            Arc::new(Encoder::new("right", Box::new(right.clone()))),
            Arc::new(Encoder::new("lateral", Box::new(lateral))),
            Arc::new(imu.clone()),
        );
        Rig {
            estimator,
            left,
            right,
            imu,
        }
    }

    #[test]
    fn test_starts_at_origin() {
        let rig = rig();
        assert_eq!(rig.estimator.pose(), Pose::default());
        assert!(!rig.estimator.is_running());
    }

    #[test]
    fn test_manual_cycle_tracks_drive() {
        let rig = rig();
        let ticks = to_encoder_ticks(12.0, DriveGeometry::default().wheel_diameter);
        rig.left.add(ticks);
        rig.right.add(ticks);
        rig.estimator.update();

        let (x, y) = rig.estimator.position();
        assert!((x - 12.0).abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn test_set_pose_rezeroes_readings() {
        let rig = rig();
        rig.left.add(1000.0);
        rig.right.add(1000.0);
        rig.imu.set_heading(30.0);

        rig.estimator.set_pose(Pose::new(5.0, 6.0, 0.0));
        rig.estimator.update();

        let pose = rig.estimator.pose();
        assert!((pose.x - 5.0).abs() < 1e-12);
        assert!((pose.y - 6.0).abs() < 1e-12);
        assert!(pose.heading.abs() < 1e-12);
    }

    #[test]
    fn test_sensor_fault_skips_cycle() {
        let rig = rig();
        rig.imu.set_failing(true);
        rig.left.add(500.0);
        rig.right.add(500.0);
        rig.estimator.update();
        assert_eq!(rig.estimator.pose(), Pose::default());

        rig.imu.set_failing(false);
        rig.estimator.update();
        assert!(rig.estimator.pose().x > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_until_stopped() {
        let rig = rig();
        rig.estimator.start();
        rig.estimator.start_logging();

        rig.left.add(360.0);
        rig.right.add(360.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let moved = rig.estimator.pose().x;
        assert!(moved > 0.0);

        rig.estimator.stop();
        rig.left.add(360.0);
        rig.right.add(360.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.estimator.pose().x, moved);
    }
}
