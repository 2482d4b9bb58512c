// Message types exchanged over the telemetry session

use serde::{Deserialize, Serialize};

use crate::motor::MotorSnapshot;
use crate::odometry::Pose;

// Motion request from scripts/operator -> runtime
// Distances in inches, angles in degrees clockwise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotionRequest {
    DriveToPoint {
        x: f64,
        y: f64,
        #[serde(default)]
        waypoints: usize,
        #[serde(default)]
        recalculations: usize,
    },
    TurnToPoint {
        x: f64,
        y: f64,
    },
    TurnToAngle {
        degrees: f64,
    },
    /// Straight drive relative to the current pose
    Straight {
        inches: f64,
        #[serde(default)]
        heading: f64,
    },
    /// Turn relative to the current heading
    Turn {
        degrees: f64,
    },
    Stop,
}

// Pose estimate published by runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseTelemetry {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
}

impl From<Pose> for PoseTelemetry {
    fn from(pose: Pose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading_degrees(),
        }
    }
}

// Every registered motor, published each loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorTelemetry {
    pub motors: Vec<MotorSnapshot>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    SchedulerStopped,
    EstimatorStopped,
}
