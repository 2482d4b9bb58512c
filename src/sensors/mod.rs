// Sensor seams
//
// Encoders report cumulative ticks, the inertial sensor reports heading in
// degrees clockwise in [0, 360), analog sensors report raw ADC counts.

mod encoder;

pub use encoder::{Encoder, ReferenceId};

use crate::error::Result;

/// Raw quadrature encoder
pub trait EncoderDevice: Send {
    /// Cumulative ticks since power-on
    fn ticks(&self) -> Result<f64>;
}

/// Inertial heading source
pub trait HeadingSensor: Send + Sync {
    /// Heading in degrees, clockwise, in [0, 360)
    fn heading(&self) -> Result<f64>;
}

/// Analog input such as a line sensor or a potentiometer
pub trait AnalogSensor: Send + Sync {
    fn value(&self) -> Result<i32>;
}
