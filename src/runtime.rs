// Robot assembly and the 50 Hz telemetry loop
//
// `Robot` owns every long-running service: the motor scheduler, the pose
// estimator and one actor per mechanism. The telemetry loop publishes their
// state and forwards motion requests to the chassis actor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    MotorConfig, RobotConfig, LOOP_HZ, TOPIC_CMD_MOTION, TOPIC_HEALTH, TOPIC_MOTORS, TOPIC_POSE,
};
use crate::messages::{MotionRequest, MotorTelemetry, PoseTelemetry, RuntimeHealth};
use crate::motor::{MotorControlUnit, MotorDevice, MotorScheduler, MotorSnapshot};
use crate::odometry::{to_encoder_ticks, Point, PoseEstimator};
use crate::sensors::{AnalogSensor, Encoder, EncoderDevice, HeadingSensor};
use crate::subsystems::chassis::{DriveTrain, MotionProfile, RouteOptions, StraightDrive, Turn};
use crate::subsystems::{Actor, Chassis, Differential, Indexer, Intakes, Outcome};

/// Device handles the runtime is built from
pub struct Hardware {
    pub front_left: Box<dyn MotorDevice>,
    pub front_right: Box<dyn MotorDevice>,
    pub back_left: Box<dyn MotorDevice>,
    pub back_right: Box<dyn MotorDevice>,
    pub left_intake: Box<dyn MotorDevice>,
    pub right_intake: Box<dyn MotorDevice>,
    pub upper_indexer: Box<dyn MotorDevice>,
    pub lower_indexer: Box<dyn MotorDevice>,
    pub differential_a: Box<dyn MotorDevice>,
    pub differential_b: Box<dyn MotorDevice>,
    pub left_encoder: Box<dyn EncoderDevice>,
    pub right_encoder: Box<dyn EncoderDevice>,
    pub lateral_encoder: Box<dyn EncoderDevice>,
    pub imu: Arc<dyn HeadingSensor>,
    pub ball_sensor: Arc<dyn AnalogSensor>,
    pub top_sensor: Arc<dyn AnalogSensor>,
    pub potentiometer: Arc<dyn AnalogSensor>,
}

/// Application context: every service of the robot, explicitly wired
pub struct Robot {
    scheduler: Arc<MotorScheduler>,
    estimator: Arc<PoseEstimator>,
    pub chassis: Actor<Chassis>,
    pub intakes: Actor<Intakes>,
    pub indexer: Actor<Indexer>,
    pub differential: Actor<Differential>,
    motors: Vec<Arc<MotorControlUnit>>,
}

impl Robot {
    /// Build and wire every service; must be called inside a tokio runtime
    ///
    /// Motors are registered with the scheduler but nothing runs until
    /// [`Robot::start`].
    pub fn new(config: &RobotConfig, hw: Hardware) -> Self {
        let scheduler = Arc::new(MotorScheduler::new());
        let mut motors = Vec::new();
        let mut unit = |device: Box<dyn MotorDevice>, motor: &MotorConfig| {
            let unit = Arc::new(MotorControlUnit::new(
                device,
                config.internal_motor_pid,
                config.motor_slew_rate,
            ));
            if let Err(e) = unit.set_reversed(motor.reversed) {
                warn!("Motor {} direction not set: {}", motor.port, e);
            }
            scheduler.register(&unit);
            motors.push(Arc::clone(&unit));
            unit
        };

        let d = &config.drive;
        let front_left = unit(hw.front_left, &d.front_left);
        let front_right = unit(hw.front_right, &d.front_right);
        let back_left = unit(hw.back_left, &d.back_left);
        let back_right = unit(hw.back_right, &d.back_right);
        let m = &config.mechanisms;
        let left_intake = unit(hw.left_intake, &m.left_intake);
        let right_intake = unit(hw.right_intake, &m.right_intake);
        let upper_indexer = unit(hw.upper_indexer, &m.upper_indexer);
        let lower_indexer = unit(hw.lower_indexer, &m.lower_indexer);
        let differential_a = unit(hw.differential_a, &m.differential_a);
        let differential_b = unit(hw.differential_b, &m.differential_b);

        let left_encoder = Arc::new(Encoder::new("left", hw.left_encoder));
        let right_encoder = Arc::new(Encoder::new("right", hw.right_encoder));
        let lateral_encoder = Arc::new(Encoder::new("lateral", hw.lateral_encoder));

        let estimator = Arc::new(PoseEstimator::new(
            config.geometry,
            Arc::clone(&left_encoder),
            Arc::clone(&right_encoder),
            lateral_encoder,
            hw.imu,
        ));

        let chassis = Chassis::new(
            DriveTrain {
                left: [front_left, back_left],
                right: [front_right, back_right],
                left_encoder,
                right_encoder,
            },
            Arc::clone(&estimator),
            Arc::clone(&scheduler),
            Arc::new(MotionProfile::generate(&config.profile)),
            config.geometry.wheel_diameter,
            config.chassis,
        );

        info!("Robot assembled with {} motors", motors.len());
        Self {
            chassis: Actor::spawn(chassis),
            intakes: Actor::spawn(Intakes::new(left_intake, right_intake, hw.ball_sensor)),
            indexer: Actor::spawn(Indexer::new(upper_indexer, lower_indexer, hw.top_sensor)),
            differential: Actor::spawn(Differential::new(
                differential_a,
                differential_b,
                hw.potentiometer,
            )),
            scheduler,
            estimator,
            motors,
        }
    }

    /// Start the motor scheduler and the pose estimator
    pub fn start(&self) {
        self.scheduler.start();
        self.estimator.start();
    }

    pub fn stop(&self) {
        self.estimator.stop();
        self.scheduler.stop();
    }

    pub fn scheduler(&self) -> &Arc<MotorScheduler> {
        &self.scheduler
    }

    pub fn estimator(&self) -> &Arc<PoseEstimator> {
        &self.estimator
    }

    /// Every control unit, drive motors first
    pub fn motors(&self) -> &[Arc<MotorControlUnit>] {
        &self.motors
    }

    pub fn pose_telemetry(&self) -> PoseTelemetry {
        PoseTelemetry::from(self.estimator.pose())
    }

    pub fn motor_snapshots(&self) -> Vec<MotorSnapshot> {
        self.motors.iter().map(|m| m.snapshot()).collect()
    }

    pub fn health(&self) -> RuntimeHealth {
        if !self.scheduler.is_running() {
            RuntimeHealth::SchedulerStopped
        } else if !self.estimator.is_running() {
            RuntimeHealth::EstimatorStopped
        } else {
            RuntimeHealth::Ok
        }
    }

    /// Run a motion request on the chassis and wait for it
    pub async fn execute(&self, request: MotionRequest) -> Outcome {
        let wheel = self.chassis.mechanism().wheel_diameter();
        match request {
            MotionRequest::DriveToPoint {
                x,
                y,
                waypoints,
                recalculations,
            } => {
                let options = RouteOptions {
                    waypoints,
                    recalculations,
                    ..RouteOptions::default()
                };
                self.chassis.drive_to_point(Point::new(x, y), options).await
            }
            MotionRequest::TurnToPoint { x, y } => {
                self.chassis
                    .turn_to_point(Point::new(x, y), Default::default())
                    .await
            }
            MotionRequest::TurnToAngle { degrees } => self.chassis.turn_to_angle(degrees).await,
            MotionRequest::Straight { inches, heading } => {
                let drive = StraightDrive::new(to_encoder_ticks(inches, wheel)).heading(heading);
                self.chassis.wait(self.chassis.drive_straight(drive)).await
            }
            MotionRequest::Turn { degrees } => {
                self.chassis.wait(self.chassis.turn(Turn::new(degrees))).await
            }
            MotionRequest::Stop => self.chassis.wait(self.chassis.stop()).await,
        }
    }
}

pub async fn run(robot: Arc<Robot>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_MOTION).await?;
    let pub_pose = session.declare_publisher(TOPIC_POSE).await?;
    let pub_motors = session.declare_publisher(TOPIC_MOTORS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Telemetry started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_MOTION);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_POSE, TOPIC_MOTORS, TOPIC_HEALTH
    );

    loop {
        tick.tick().await;

        // 1. Drain pending motion requests (non-blocking); each runs on its own task
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotionRequest>(&payload) {
                Ok(request) => {
                    info!("Received request: {:?}", request);
                    let robot = Arc::clone(&robot);
                    tokio::spawn(async move {
                        let outcome = robot.execute(request).await;
                        info!("Request {:?} finished: {:?}", request, outcome);
                    });
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                }
            }
        }

        // 2. Publish pose and motors
        let pose_json = serde_json::to_string(&robot.pose_telemetry())?;
        pub_pose.put(pose_json).await?;

        let motors = MotorTelemetry {
            motors: robot.motor_snapshots(),
        };
        pub_motors.put(serde_json::to_string(&motors)?).await?;

        // 3. Publish health
        let health_json = serde_json::to_string(&robot.health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::MotorMode;
    use crate::sim::SimRobot;
    use crate::odometry::to_inches;
    use crate::subsystems::chassis::{ChassisTuning, OpenLoop, ProfiledDrive};
    use tokio::time::{sleep, Instant};

    fn robot() -> (Arc<Robot>, SimRobot) {
        let config = RobotConfig::default();
        let sim = SimRobot::new(&config);
        let robot = Arc::new(Robot::new(&config, sim.hardware()));
        (robot, sim)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_motor_registered() {
        let (robot, _sim) = robot();
        let mut ports = robot.scheduler().registered_ports();
        ports.sort();
        let mut expected = RobotConfig::default().motor_ports();
        expected.sort();
        assert_eq!(ports, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_follows_services() {
        let (robot, _sim) = robot();
        assert_eq!(robot.health(), RuntimeHealth::SchedulerStopped);
        robot.scheduler().start();
        assert_eq!(robot.health(), RuntimeHealth::EstimatorStopped);
        robot.start();
        assert_eq!(robot.health(), RuntimeHealth::Ok);
        robot.stop();
        assert_eq!(robot.health(), RuntimeHealth::SchedulerStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_straight_drive_settles_before_timeout() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let start = Instant::now();
        let id = robot
            .chassis
            .drive_straight(StraightDrive::new(1000.0).max_velocity(200.0));
        assert_eq!(robot.chassis.wait(id).await, Outcome::Settled);
        assert!(start.elapsed() < Duration::from_secs(5));

        let expected = crate::odometry::to_inches(1000.0, 3.25);
        assert!((robot.estimator().pose().x - expected).abs() < 1.0);
        for motor in robot.motors().iter().take(4) {
            assert_eq!(motor.mode(), MotorMode::Voltage);
            assert!(motor.driver_control_allowed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_drive_times_out() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();
        for motor in sim.drive_motors() {
            motor.set_stalled(true);
        }

        let start = Instant::now();
        let drive = StraightDrive::new(1000.0).timeout(Duration::from_secs(1));
        let outcome = robot.chassis.wait(robot.chassis.drive_straight(drive)).await;
        assert_eq!(outcome, Outcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(robot.estimator().pose().x.abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_already_on_heading_settles() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let start = Instant::now();
        let turn = Turn::new(0.0).timeout(Duration::from_secs(2));
        assert_eq!(robot.chassis.wait(robot.chassis.turn(turn)).await, Outcome::Settled);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_profiled_drive_ramps_and_restores_drive() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let id = robot.chassis.drive_profiled(ProfiledDrive::new(1000.0));
        let mut commanded = Vec::new();
        let outcome = loop {
            if let Some(outcome) = robot.chassis.poll(id) {
                break outcome;
            }
            commanded.extend(sim.front_left.commanded_velocity());
            sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(outcome, Outcome::Settled);

        // Leaves and arrives near the profile floor, cruises at full speed between
        let first = commanded[0];
        let last = commanded[commanded.len() - 1];
        assert!(first > 0 && first < 60, "first command {first}");
        assert!(last > 0 && last < 60, "last command {last}");
        assert_eq!(commanded.iter().copied().max(), Some(200));

        sleep(Duration::from_millis(200)).await;
        let expected = to_inches(1000.0, 3.25);
        let pose = robot.estimator().pose();
        assert!((pose.x - expected).abs() < 1.0, "stopped at x={}", pose.x);
        assert!(pose.heading.abs() < 0.01);
        for motor in robot.motors().iter().take(4) {
            assert_eq!(motor.mode(), MotorMode::Voltage);
            assert_eq!(motor.target_voltage(), 0);
            assert!(motor.driver_control_allowed());
        }
        for motor in sim.drive_motors() {
            assert_eq!(motor.commanded_voltage(), 0);
        }
    }

    // Largest heading excursion, degrees, of a straight drive whose left side is loaded
    async fn peak_heading_with_loaded_left(heading_kp: f64) -> f64 {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();
        sim.front_left.set_efficiency(0.8);
        sim.back_left.set_efficiency(0.8);
        let chassis = robot.chassis.mechanism();
        chassis.set_tuning(ChassisTuning {
            heading_kp,
            ..chassis.tuning()
        });

        let id = robot.chassis.drive_straight(StraightDrive::new(1000.0));
        let mut peak: f64 = 0.0;
        let outcome = loop {
            if let Some(outcome) = robot.chassis.poll(id) {
                break outcome;
            }
            peak = peak.max(robot.estimator().pose().heading.abs());
            sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(outcome, Outcome::Settled);
        peak.to_degrees()
    }

    #[tokio::test(start_paused = true)]
    async fn test_straight_drive_holds_heading_with_loaded_side() {
        let drifting = peak_heading_with_loaded_left(0.0).await;
        let held = peak_heading_with_loaded_left(10.0).await;
        assert!(drifting > 5.0, "uncorrected drift {drifting}");
        assert!(held < drifting / 2.0, "held {held} vs drifting {drifting}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_running_route() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let options = RouteOptions {
            waypoints: 2,
            ..RouteOptions::default()
        };
        let route = robot.chassis.submit_route(Point::new(48.0, 0.0), options);
        sleep(Duration::from_millis(400)).await;
        assert!(robot.estimator().pose().x < 16.0);

        // The first leg finishes, the other two never start
        assert_eq!(robot.execute(MotionRequest::Stop).await, Outcome::Completed);
        assert_eq!(robot.chassis.poll(route), Some(Outcome::Cancelled));
        sleep(Duration::from_millis(500)).await;
        let x = robot.estimator().pose().x;
        assert!(x < 20.0, "kept driving to x={x}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_is_not_interleaved_with_later_commands() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let options = RouteOptions {
            waypoints: 1,
            ..RouteOptions::default()
        };
        let route = robot.chassis.submit_route(Point::new(24.0, 0.0), options);
        let turn = robot.chassis.turn(Turn::new(90.0));

        assert_eq!(robot.chassis.wait(route).await, Outcome::Settled);
        // Both legs ran before the turn started, so the robot reached the target facing +x
        let pose = robot.estimator().pose();
        assert!((pose.x - 24.0).abs() < 1.0);
        assert!(pose.heading.abs() < 3f64.to_radians());
        assert_eq!(robot.chassis.wait(turn).await, Outcome::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_turn_times_out_at_zero_volts() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        // Heading stays frozen without the estimator
        robot.scheduler().start();

        let start = Instant::now();
        let turn = Turn::new(90.0).timeout(Duration::from_millis(500));
        assert_eq!(robot.chassis.wait(robot.chassis.turn(turn)).await, Outcome::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(600));

        sleep(Duration::from_millis(30)).await;
        for motor in sim.drive_motors() {
            assert_eq!(motor.commanded_voltage(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_to_point_straight_ahead() {
        let (robot, sim) = robot();
        let _physics = sim.spawn_physics();
        robot.start();

        let outcome = robot
            .execute(MotionRequest::DriveToPoint {
                x: 24.0,
                y: 0.0,
                waypoints: 0,
                recalculations: 0,
            })
            .await;
        assert_eq!(outcome, Outcome::Settled);
        let pose = robot.estimator().pose();
        assert!((pose.x - 24.0).abs() < 1.0);
        assert!(pose.y.abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_loop_detaches_drive_from_scheduler() {
        let (robot, sim) = robot();
        robot.scheduler().start();
        let front_left = Arc::clone(&robot.motors()[0]);

        let id = robot.chassis.open_loop(OpenLoop {
            left_mv: 6000,
            right_mv: -6000,
            duration: Duration::from_millis(200),
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!robot.scheduler().is_registered(&front_left));
        assert_eq!(sim.front_left.commanded_voltage(), 6000);
        assert_eq!(sim.front_right.commanded_voltage(), -6000);

        assert_eq!(robot.chassis.wait(id).await, Outcome::Completed);
        assert!(robot.scheduler().is_registered(&front_left));
        assert_eq!(sim.front_left.commanded_voltage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_cancels_backlog() {
        let (robot, _sim) = robot();
        robot.scheduler().start();

        let slow = Turn::new(90.0).timeout(Duration::from_millis(200));
        robot.chassis.turn(slow);
        let queued = robot.chassis.turn(slow);
        sleep(Duration::from_millis(20)).await;

        assert_eq!(robot.execute(MotionRequest::Stop).await, Outcome::Completed);
        assert_eq!(robot.chassis.poll(queued), Some(Outcome::Cancelled));
    }
}
