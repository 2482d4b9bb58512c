// Point navigation built from turns and straight drives
//
// Planning is pure: a pose and a target produce a list of turn/drive legs.
// Execution runs every leg inside one chassis command, so nothing queued
// behind the route can interleave with it, and may re-plan the remaining
// legs from the live pose.

use std::f64::consts::PI;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    Chassis, ChassisCommand, ProfiledDrive, StraightDrive, Turn, DEFAULT_MAX_VELOCITY, DEFAULT_TIMEOUT,
};
use crate::odometry::{to_degrees, to_encoder_ticks, wrap_delta, Point, Pose};
use crate::subsystems::{Actor, CommandId, Outcome};

/// Which end of the robot faces the target while driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Whichever needs the smaller turn
    #[default]
    Auto,
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteOptions {
    pub direction: Direction,
    /// Intermediate points inserted evenly between start and target
    pub waypoints: usize,
    /// Times the remaining legs are re-planned from the measured pose
    pub recalculations: usize,
    pub max_velocity: f64,
    pub turn_velocity: f64,
    /// Per leg primitive
    pub timeout: Duration,
    /// Use the motion profile instead of the PID straight drive
    pub profiled: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Auto,
            waypoints: 0,
            recalculations: 0,
            max_velocity: DEFAULT_MAX_VELOCITY,
            turn_velocity: DEFAULT_MAX_VELOCITY,
            timeout: DEFAULT_TIMEOUT,
            profiled: false,
        }
    }
}

/// Straight part of a leg
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LegDrive {
    Straight(StraightDrive),
    Profiled(ProfiledDrive),
}

/// One turn-then-drive step of a route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub turn: Turn,
    pub drive: LegDrive,
}

/// Clockwise bearing from `from` to `to`, radians
fn bearing(from: Point, to: Point) -> f64 {
    -(to.y - from.y).atan2(to.x - from.x)
}

/// Relative turn in radians that faces `target`, and whether the robot then backs up
fn facing_turn(pose: Pose, target: Point, direction: Direction) -> (f64, bool) {
    let forward = wrap_delta(bearing(pose.position(), target) - pose.heading);
    let backward = wrap_delta(forward + PI);
    match direction {
        Direction::Forward => (forward, false),
        Direction::Backward => (backward, true),
        Direction::Auto if backward.abs() < forward.abs() => (backward, true),
        Direction::Auto => (forward, false),
    }
}

/// Turn that faces `target` from `pose`
pub fn plan_turn_to_point(pose: Pose, target: Point, direction: Direction) -> Turn {
    let (turn, _) = facing_turn(pose, target, direction);
    Turn::new(to_degrees(turn))
}

/// Turn onto the absolute heading `degrees`, the short way round
pub fn plan_turn_to_angle(pose: Pose, degrees: f64) -> Turn {
    let target = degrees.to_radians();
    Turn::new(to_degrees(wrap_delta(target - pose.heading)))
}

/// Legs from `pose` to `target`, subdivided into `waypoints + 1` equal segments
pub fn plan_route(pose: Pose, target: Point, options: &RouteOptions, wheel_diameter: f64) -> Vec<Leg> {
    let segments = options.waypoints + 1;
    let start = pose.position();
    let (dx, dy) = (target.x - start.x, target.y - start.y);

    let mut assumed = pose;
    let mut legs = Vec::with_capacity(segments);
    for k in 1..=segments {
        let scale = k as f64 / segments as f64;
        let point = Point::new(start.x + dx * scale, start.y + dy * scale);
        let distance = (point.x - assumed.x).hypot(point.y - assumed.y);
        let (turn, backward) = facing_turn(assumed, target_or(point, assumed), options.direction);

        let inches = if backward { -distance } else { distance };
        let ticks = to_encoder_ticks(inches, wheel_diameter);
        let drive = if options.profiled {
            LegDrive::Profiled(
                ProfiledDrive::new(ticks)
                    .max_velocity(options.max_velocity)
                    .timeout(options.timeout),
            )
        } else {
            LegDrive::Straight(
                StraightDrive::new(ticks)
                    .max_velocity(options.max_velocity)
                    .timeout(options.timeout),
            )
        };
        legs.push(Leg {
            turn: Turn::new(to_degrees(turn))
                .max_velocity(options.turn_velocity)
                .timeout(options.timeout),
            drive,
        });

        assumed = Pose::new(point.x, point.y, assumed.heading + turn);
    }
    legs
}

// A zero-length leg keeps the current heading instead of turning toward atan2(0, 0)
fn target_or(point: Point, pose: Pose) -> Point {
    if (point.x - pose.x).hypot(point.y - pose.y) < f64::EPSILON {
        Point::new(pose.x + pose.heading.cos(), pose.y - pose.heading.sin())
    } else {
        point
    }
}

/// Most significant of two leg outcomes
fn worse(a: Outcome, b: Outcome) -> Outcome {
    let rank = |o: Outcome| match o {
        Outcome::Completed => 0,
        Outcome::Settled => 1,
        Outcome::TimedOut => 2,
        Outcome::Cancelled => 3,
    };
    if rank(b) > rank(a) { b } else { a }
}

impl Chassis {
    /// Drive to `target` as a sequence of turn-then-drive legs
    ///
    /// Legs are planned from the pose when the route starts. Each
    /// recalculation re-plans the remaining legs from the measured pose after
    /// a leg ends. A stop issued while the route runs lets the current
    /// primitive finish and abandons the rest.
    pub(super) async fn follow_route(&self, target: Point, options: RouteOptions) -> Outcome {
        let stops = self.stop_count();
        let start = self.estimator.pose();
        info!(
            "Driving from ({:.1}, {:.1}) to ({:.1}, {:.1})",
            start.x, start.y, target.x, target.y
        );

        let mut legs = plan_route(start, target, &options, self.wheel_diameter);
        let mut recalculations = options.recalculations;
        let mut outcome = Outcome::Settled;
        let mut index = 0;

        while index < legs.len() {
            let leg = legs[index];
            debug!("Leg {}: {:?}", index, leg);
            outcome = worse(outcome, self.pid_turn(leg.turn).await);
            if self.stop_count() != stops {
                outcome = Outcome::Cancelled;
                break;
            }
            let driven = match leg.drive {
                LegDrive::Straight(drive) => self.pid_straight(drive).await,
                LegDrive::Profiled(drive) => self.profiled_straight(drive).await,
            };
            outcome = worse(outcome, driven);
            if self.stop_count() != stops {
                outcome = Outcome::Cancelled;
                break;
            }
            index += 1;

            let remaining = legs.len() - index;
            if remaining > 0 && recalculations > 0 {
                recalculations -= 1;
                let live = self.estimator.pose();
                let replan = RouteOptions {
                    waypoints: remaining - 1,
                    ..options
                };
                debug!("Re-planning {} legs from {:?}", remaining, live);
                legs.truncate(index);
                legs.extend(plan_route(live, target, &replan, self.wheel_diameter));
            }
        }

        let end = self.estimator.pose();
        info!("Route finished at ({:.1}, {:.1}): {:?}", end.x, end.y, outcome);
        outcome
    }

    pub(super) async fn turn_toward(&self, target: Point, direction: Direction) -> Outcome {
        let turn = plan_turn_to_point(self.estimator.pose(), target, direction);
        self.pid_turn(turn).await
    }

    pub(super) async fn turn_onto(&self, degrees: f64) -> Outcome {
        let turn = plan_turn_to_angle(self.estimator.pose(), degrees);
        self.pid_turn(turn).await
    }
}

impl Actor<Chassis> {
    /// Queue a route to `target`; see [`ChassisCommand::Route`]
    pub fn submit_route(&self, target: Point, options: RouteOptions) -> CommandId {
        self.submit(ChassisCommand::Route { target, options })
    }

    pub async fn drive_to_point(&self, target: Point, options: RouteOptions) -> Outcome {
        self.run(ChassisCommand::Route { target, options }).await
    }

    /// Turn to face `target`, planned from the pose when the turn starts
    pub async fn turn_to_point(&self, target: Point, direction: Direction) -> Outcome {
        self.run(ChassisCommand::TurnToPoint { target, direction }).await
    }

    /// Turn onto an absolute field heading in degrees
    pub async fn turn_to_angle(&self, degrees: f64) -> Outcome {
        self.run(ChassisCommand::TurnToAngle(degrees)).await
    }
}
