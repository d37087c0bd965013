//! Steering/throttle mixers handed to the drive loop.
//!
//! The drive loop calls `ActuatorMixer::update` once per tick with a
//! steering and throttle command, both in `[-1, 1]`.
//!
//! - `AckermannMixer`: RC car, a steering servo plus an ESC
//! - `DifferentialDriveMixer`: two wheel motors, steering by speed difference

use embedded_hal::delay::DelayNs;

use crate::utils::{
    actuators::{PulseRange, PwmSteering, PwmThrottle, SteeringCalibration},
    controllers::{check_range, ActuatorError, Motor, PulseController},
};

/// Something the drive loop can steer.
pub trait ActuatorMixer {
    fn update(
        &mut self,
        steering: f32,
        throttle: f32,
    ) -> Result<(), ActuatorError>;
}

/// Servo steering and ESC throttle.
pub struct AckermannMixer<S, T> {
    pub steering: PwmSteering<S>,
    pub throttle: PwmThrottle<T>,
}

impl<S, T> AckermannMixer<S, T>
where
    S: PulseController,
    T: PulseController,
{
    pub fn new(
        steering: PwmSteering<S>,
        throttle: PwmThrottle<T>,
    ) -> Self {
        AckermannMixer { steering, throttle }
    }

    /// Build both actuators; the throttle is calibrated before this returns.
    pub fn from_controllers<D: DelayNs>(
        steering: S,
        steering_calibration: SteeringCalibration,
        throttle: T,
        throttle_range: PulseRange,
        delay: &mut D,
        settle_ms: u32,
    ) -> Result<Self, ActuatorError> {
        Ok(AckermannMixer {
            steering: PwmSteering::new(steering, steering_calibration)?,
            throttle: PwmThrottle::new(throttle, throttle_range, delay, settle_ms)?,
        })
    }
}

impl<S, T> ActuatorMixer for AckermannMixer<S, T>
where
    S: PulseController,
    T: PulseController,
{
    fn update(
        &mut self,
        steering: f32,
        throttle: f32,
    ) -> Result<(), ActuatorError> {
        self.steering.update(steering)?;
        self.throttle.update(throttle)
    }
}

/// Two independently driven wheels.
///
/// Wheel speeds are `throttle + steering` on the left and
/// `throttle - steering` on the right, each clamped to `[-1, 1]` before it
/// reaches `Motor::turn`. The motors do not clamp, so this is the only clamp
/// between the drive loop and the hardware.
///
/// If the right wheel refuses a command after the left one took it, the left
/// wheel is stopped again before the error is returned.
pub struct DifferentialDriveMixer<L, R> {
    left: L,
    right: R,
    wheels: (f32, f32),
}

impl<L: Motor, R: Motor> DifferentialDriveMixer<L, R> {
    pub fn new(
        left: L,
        right: R,
    ) -> Self {
        DifferentialDriveMixer {
            left,
            right,
            wheels: (0.0, 0.0),
        }
    }

    /// Per-wheel speeds for a command, already clamped.
    pub fn mix(
        steering: f32,
        throttle: f32,
    ) -> (f32, f32) {
        let left = (throttle + steering).clamp(-1.0, 1.0);
        let right = (throttle - steering).clamp(-1.0, 1.0);
        (left, right)
    }

    /// Stop both wheels.
    pub fn stop(&mut self) -> Result<(), ActuatorError> {
        self.left.turn(0.0)?;
        self.right.turn(0.0)?;
        self.wheels = (0.0, 0.0);
        Ok(())
    }

    /// Last `(left, right)` pair sent to the motors.
    pub fn wheels(&self) -> (f32, f32) {
        self.wheels
    }

    pub fn left(&self) -> &L {
        &self.left
    }

    pub fn right(&self) -> &R {
        &self.right
    }

    pub fn into_inner(self) -> (L, R) {
        (self.left, self.right)
    }
}

impl<L: Motor, R: Motor> ActuatorMixer for DifferentialDriveMixer<L, R> {
    fn update(
        &mut self,
        steering: f32,
        throttle: f32,
    ) -> Result<(), ActuatorError> {
        let steering = check_range(steering, -1.0, 1.0)?;
        let throttle = check_range(throttle, -1.0, 1.0)?;
        if steering == 0.0 && throttle == 0.0 {
            return self.stop();
        }

        let (left, right) = Self::mix(steering, throttle);
        self.left.turn(left)?;
        if let Err(e) = self.right.turn(right) {
            // never leave one wheel driving on its own
            tracing::warn!(error = %e, "right wheel refused, stopping left");
            self.wheels.0 = if self.left.turn(0.0).is_ok() { 0.0 } else { left };
            return Err(e);
        }
        self.wheels = (left, right);
        tracing::debug!(steering, throttle, left, right, "differential mix");
        Ok(())
    }
}
