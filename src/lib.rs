//! Motion-control runtime for a differential-drive competition robot.
//!
//! The runtime turns high level motion requests into per-motor commands while
//! estimating the robot pose from wheel encoders and an inertial sensor:
//!
//! - [`motor`]: per-motor control units and the fixed-period motor scheduler
//! - [`sensors`]: encoder reference ids and the sensor device seams
//! - [`odometry`]: the dead-reckoning pose estimator
//! - [`subsystems`]: command-queue actors for every mechanism, including the
//!   chassis motion engine
//! - [`serial`]: framing for requests arriving over a serial link
//! - [`sim`]: simulated devices used by the binary and the tests
//! - [`runtime`]: the application context and the telemetry loop

pub mod config;
pub mod control;
pub mod error;
pub mod messages;
pub mod motor;
pub mod odometry;
pub mod runtime;
pub mod sensors;
pub mod serial;
pub mod sim;
pub mod subsystems;

pub use error::{Error, Result};
