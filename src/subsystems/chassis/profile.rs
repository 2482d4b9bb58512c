// Precomputed velocity profile for profiled straight drives
//
// Two normalized curves sampled once per encoder tick: the acceleration
// curve is indexed by ticks traveled, the deceleration curve by ticks
// remaining. The commanded fraction is the smaller of the two.

use serde::{Deserialize, Serialize};

/// Shape of the ramp between rest and full speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileShape {
    Trapezoidal,
    #[default]
    Sigmoid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub shape: ProfileShape,
    /// Ticks spent ramping up to full speed
    pub accel_ticks: usize,
    /// Ticks spent ramping down to rest
    pub decel_ticks: usize,
    /// Fraction never dropped below, so the robot does not stall short
    pub min_fraction: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            shape: ProfileShape::Sigmoid,
            accel_ticks: 300,
            decel_ticks: 500,
            min_fraction: 0.15,
        }
    }
}

// Steepness of the logistic curve over its normalized domain
const SIGMOID_GAIN: f64 = 12.0;

/// Immutable once generated; shared by every profiled drive
#[derive(Debug, Clone)]
pub struct MotionProfile {
    accel: Vec<f64>,
    decel: Vec<f64>,
    min_fraction: f64,
}

impl MotionProfile {
    pub fn generate(config: &ProfileConfig) -> Self {
        Self {
            accel: curve(config.shape, config.accel_ticks),
            decel: curve(config.shape, config.decel_ticks),
            min_fraction: config.min_fraction.clamp(0.0, 1.0),
        }
    }

    /// Normalized velocity after `traveled` of `total` ticks
    pub fn fraction(&self, traveled: f64, total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        let traveled = traveled.clamp(0.0, total);
        let up = sample(&self.accel, traveled);
        let down = sample(&self.decel, total - traveled);
        up.min(down).clamp(self.min_fraction, 1.0)
    }

    pub fn accel_len(&self) -> usize {
        self.accel.len()
    }

    pub fn decel_len(&self) -> usize {
        self.decel.len()
    }
}

fn sample(curve: &[f64], ticks: f64) -> f64 {
    curve.get(ticks.floor() as usize).copied().unwrap_or(1.0)
}

fn curve(shape: ProfileShape, len: usize) -> Vec<f64> {
    let logistic = |x: f64| 1.0 / (1.0 + (-SIGMOID_GAIN * (x - 0.5)).exp());
    let (low, high) = (logistic(0.0), logistic(1.0));
    (0..len)
        .map(|i| {
            let x = i as f64 / len as f64;
            match shape {
                ProfileShape::Trapezoidal => x,
                ProfileShape::Sigmoid => (logistic(x) - low) / (high - low),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(shape: ProfileShape) -> MotionProfile {
        MotionProfile::generate(&ProfileConfig {
            shape,
            accel_ticks: 100,
            decel_ticks: 200,
            min_fraction: 0.1,
        })
    }

    #[test]
    fn test_curves_are_monotonic() {
        for shape in [ProfileShape::Trapezoidal, ProfileShape::Sigmoid] {
            let p = profile(shape);
            assert!(p.accel.windows(2).all(|w| w[0] <= w[1]));
            assert!(p.decel.windows(2).all(|w| w[0] <= w[1]));
            assert!(p.accel.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_cruise_in_the_middle() {
        let p = profile(ProfileShape::Sigmoid);
        assert_eq!(p.fraction(500.0, 1000.0), 1.0);
    }

    #[test]
    fn test_ramps_at_ends_respect_floor() {
        let p = profile(ProfileShape::Trapezoidal);
        assert_eq!(p.fraction(0.0, 1000.0), 0.1);
        assert_eq!(p.fraction(1000.0, 1000.0), 0.1);
        assert!((p.fraction(50.0, 1000.0) - 0.5).abs() < 1e-12);
        assert!((p.fraction(900.0, 1000.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_short_move_never_reaches_full_speed() {
        let p = profile(ProfileShape::Trapezoidal);
        let peak = (0..=100)
            .map(|t| p.fraction(t as f64, 100.0))
            .fold(0.0, f64::max);
        assert!(peak < 1.0);
    }

    #[test]
    fn test_zero_distance() {
        let p = profile(ProfileShape::Sigmoid);
        assert_eq!(p.fraction(0.0, 0.0), 0.0);
    }
}
