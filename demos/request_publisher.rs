// Publish one motion request to a running runtime
//
//   cargo run --example request_publisher -- drive-to-point 36 0 --waypoints 1
use clap::{Parser, Subcommand};
use tracing::info;

use motion_runtime::config::TOPIC_CMD_MOTION;
use motion_runtime::messages::MotionRequest;

#[derive(Parser, Debug)]
#[command(about = "Send a motion request over zenoh")]
struct Args {
    #[command(subcommand)]
    request: Request,
}

#[derive(Subcommand, Debug)]
enum Request {
    /// Drive to a field point in inches
    DriveToPoint {
        x: f64,
        y: f64,
        #[arg(long, default_value_t = 0)]
        waypoints: usize,
        #[arg(long, default_value_t = 0)]
        recalculations: usize,
    },
    TurnToPoint { x: f64, y: f64 },
    /// Turn onto an absolute heading, degrees clockwise
    TurnToAngle { degrees: f64 },
    Straight {
        inches: f64,
        #[arg(long, default_value_t = 0.0)]
        heading: f64,
    },
    Turn { degrees: f64 },
    Stop,
}

impl From<Request> for MotionRequest {
    fn from(request: Request) -> Self {
        match request {
            Request::DriveToPoint {
                x,
                y,
                waypoints,
                recalculations,
            } => MotionRequest::DriveToPoint {
                x,
                y,
                waypoints,
                recalculations,
            },
            Request::TurnToPoint { x, y } => MotionRequest::TurnToPoint { x, y },
            Request::TurnToAngle { degrees } => MotionRequest::TurnToAngle { degrees },
            Request::Straight { inches, heading } => MotionRequest::Straight { inches, heading },
            Request::Turn { degrees } => MotionRequest::Turn { degrees },
            Request::Stop => MotionRequest::Stop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let request = MotionRequest::from(Args::parse().request);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOTION).await?;

    let payload = serde_json::to_string(&request)?;
    info!("Publishing {} to {}", payload, TOPIC_CMD_MOTION);
    publisher.put(payload).await?;
    Ok(())
}
