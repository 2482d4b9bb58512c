// Error types shared by the motion runtime
//
// Faults are absorbed where they happen: control loops log them and skip a
// tick, they never tear down a task.

/// Errors raised by devices, sensors, configuration and the serial boundary
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Motor on port {port} rejected command: {reason}")]
    Motor { port: u8, reason: String },

    #[error("Sensor {name} unavailable: {reason}")]
    Sensor { name: String, reason: String },

    #[error("Unknown encoder reference id {0}")]
    UnknownReference(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn motor(port: u8, reason: impl Into<String>) -> Self {
        Error::Motor {
            port,
            reason: reason.into(),
        }
    }

    pub(crate) fn sensor(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Sensor {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
