// Move-time model for stepper axes
// Bounds how long a move may take from its speed/acceleration profile, so the
// response read can wait exactly as long as the motor could still be moving.

use std::time::Duration;

use crate::instrument::{InstrumentError, Result};

/// Speed (steps/s) and acceleration (steps/s^2) of one move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    pub speed: f64,
    pub acceleration: f64,
}

impl Kinematics {
    /// Both values must be finite and strictly positive
    pub fn new(speed: f64, acceleration: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(speed) || !valid(acceleration) {
            return Err(InstrumentError::InvalidKinematics {
                speed,
                acceleration,
            });
        }
        Ok(Self {
            speed,
            acceleration,
        })
    }

    /// Time to reach cruise speed
    pub fn accel_time(&self) -> f64 {
        self.speed / self.acceleration
    }

    /// Steps covered while accelerating
    pub fn accel_steps(&self) -> f64 {
        let t = self.accel_time();
        0.5 * self.acceleration * t * t
    }

    /// Worst-case duration of a move of `steps` steps, in seconds
    ///
    /// Trapezoidal profile when the motor reaches cruise speed, triangular
    /// otherwise.
    pub fn move_time(&self, steps: u64) -> f64 {
        let steps = steps as f64;
        let accel_time = self.accel_time();
        let accel_steps = self.accel_steps();

        if accel_steps < steps {
            let cruise_steps = steps - 2.0 * accel_steps;
            let cruise_time = cruise_steps / self.speed;
            2.0 * accel_time + cruise_time
        } else {
            2.0 * (steps / self.acceleration).sqrt()
        }
    }

    /// Read deadline for a move: move time plus a safety buffer
    ///
    /// A profile so slow that the deadline does not fit in a `Duration` is
    /// rejected as invalid kinematics.
    pub fn move_timeout(&self, steps: u64, buffer: Duration) -> Result<Duration> {
        let invalid = || InstrumentError::InvalidKinematics {
            speed: self.speed,
            acceleration: self.acceleration,
        };
        Duration::try_from_secs_f64(self.move_time(steps).max(0.0))
            .map_err(|_| invalid())?
            .checked_add(buffer)
            .ok_or_else(invalid)
    }
}

/// Read deadline for a move of `steps` steps
pub fn derive_timeout(steps: u64, speed: f64, acceleration: f64, buffer: Duration) -> Result<Duration> {
    Kinematics::new(speed, acceleration)?.move_timeout(steps, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUFFER: Duration = Duration::from_secs(3);

    fn close(a: Duration, b: Duration) -> bool {
        (a.as_secs_f64() - b.as_secs_f64()).abs() < 1e-9
    }

    #[test]
    fn test_trapezoidal_move() {
        // accel_time=1s, accel_steps=50, cruise 900 steps in 9s, total 11s
        let kinematics = Kinematics::new(100.0, 100.0).unwrap();
        assert_eq!(kinematics.accel_time(), 1.0);
        assert_eq!(kinematics.accel_steps(), 50.0);
        assert_eq!(kinematics.move_time(1000), 11.0);

        let timeout = derive_timeout(1000, 100.0, 100.0, BUFFER).unwrap();
        assert!(close(timeout, Duration::from_secs(14)));
    }

    #[test]
    fn test_triangular_move() {
        // Never reaches cruise: 2 * sqrt(25 / 100) = 1s
        let kinematics = Kinematics::new(100.0, 100.0).unwrap();
        assert_eq!(kinematics.move_time(25), 1.0);
    }

    #[test]
    fn test_zero_steps_is_just_the_buffer() {
        let timeout = derive_timeout(0, 100.0, 100.0, BUFFER).unwrap();
        assert_eq!(timeout, BUFFER);
    }

    #[test]
    fn test_timeout_at_least_buffer_and_monotonic() {
        for &(speed, acceleration) in &[(100.0, 100.0), (50.0, 400.0), (1000.0, 10.0), (1.0, 1.0)] {
            let mut previous = Duration::ZERO;
            for steps in (0..5000).step_by(7) {
                let timeout = derive_timeout(steps, speed, acceleration, BUFFER).unwrap();
                assert!(timeout >= BUFFER, "timeout below buffer at {} steps", steps);
                assert!(
                    timeout >= previous,
                    "timeout decreased at {} steps ({:?} < {:?})",
                    steps,
                    timeout,
                    previous
                );
                previous = timeout;
            }
        }
    }

    #[test]
    fn test_invalid_kinematics_rejected() {
        assert!(Kinematics::new(0.0, 100.0).is_err());
        assert!(Kinematics::new(100.0, -1.0).is_err());
        assert!(Kinematics::new(f64::NAN, 100.0).is_err());
        assert!(derive_timeout(10, 100.0, 0.0, BUFFER).is_err());
    }

    #[test]
    fn test_unrepresentable_timeout_is_an_error() {
        // Valid but absurdly slow: the move time overflows a Duration
        assert!(matches!(
            derive_timeout(1000, 1.0, 1e-40, BUFFER),
            Err(InstrumentError::InvalidKinematics { .. })
        ));
        // The buffer addition itself overflows
        assert!(derive_timeout(1000, 100.0, 100.0, Duration::MAX).is_err());
        assert!(derive_timeout(0, 100.0, 100.0, Duration::MAX).is_ok());
    }
}
