use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use motion_runtime::config::{RobotConfig, DEFAULT_BAUDRATE};
use motion_runtime::runtime::{self, Robot};
use motion_runtime::serial::RequestServer;
use motion_runtime::sim::SimRobot;

/// Motion-control runtime on simulated hardware
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON robot configuration; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port to accept framed requests on
    #[arg(long)]
    serial: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,

    /// Reject serial frames that carry the legacy constant checksum
    #[arg(long)]
    strict_checksum: bool,

    /// Skip the zenoh telemetry loop and run until ctrl-c
    #[arg(long)]
    no_telemetry: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };

    let sim = SimRobot::new(&config);
    let _physics = sim.spawn_physics();
    let robot = Arc::new(Robot::new(&config, sim.hardware()));
    robot.start();

    if let Some(port) = &args.serial {
        let server = RequestServer::open(port, args.baudrate, args.strict_checksum)?;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(20));
            loop {
                tick.tick().await;
                for request in server.drain(16) {
                    // Command-id dispatch belongs to the caller's glue
                    info!("Serial request {:?}", request);
                }
                if !server.is_running() {
                    warn!("Serial reader stopped");
                    break;
                }
            }
        });
    }

    if args.no_telemetry {
        info!("Telemetry disabled, running until ctrl-c");
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            result = runtime::run(Arc::clone(&robot)) => result?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    }

    robot.stop();
    Ok(())
}
