//! Steering servo on a pulse channel.

use serde::{Deserialize, Serialize};

use crate::utils::{
    controllers::{check_finite, ActuatorError, PulseController},
    math::range::map_range,
};

/// Full left.
pub const LEFT_ANGLE: f32 = -1.0;
/// Full right.
pub const RIGHT_ANGLE: f32 = 1.0;

/// Pulses at full left and full right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringCalibration {
    pub left_pulse: i32,
    pub right_pulse: i32,
}

impl Default for SteeringCalibration {
    fn default() -> Self {
        SteeringCalibration {
            left_pulse: 290,
            right_pulse: 490,
        }
    }
}

impl SteeringCalibration {
    pub fn validate(&self) -> Result<(), ActuatorError> {
        if self.left_pulse == self.right_pulse {
            return Err(ActuatorError::Configuration(format!(
                "steering span is empty: left and right pulse both {}",
                self.left_pulse
            )));
        }
        Ok(())
    }
}

/// Servo steering. `update` maps an angle onto the calibrated pulses.
pub struct PwmSteering<P> {
    controller: P,
    calibration: SteeringCalibration,
    angle: Option<f32>,
}

impl<P: PulseController> PwmSteering<P> {
    pub fn new(
        controller: P,
        calibration: SteeringCalibration,
    ) -> Result<Self, ActuatorError> {
        calibration.validate()?;
        Ok(PwmSteering {
            controller,
            calibration,
            angle: None,
        })
    }

    /// Steer to `angle`, `-1.0` full left and `1.0` full right.
    ///
    /// The angle is not clamped: values past `[-1, 1]` produce pulses past the
    /// calibrated endpoints, and the pulse backend decides whether it can
    /// emit them. NaN and infinities are refused before anything is written.
    pub fn update(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorError> {
        let angle = check_finite(angle, LEFT_ANGLE, RIGHT_ANGLE)?;
        let pulse = map_range(
            angle,
            LEFT_ANGLE,
            RIGHT_ANGLE,
            self.calibration.left_pulse,
            self.calibration.right_pulse,
        );
        if !(LEFT_ANGLE..=RIGHT_ANGLE).contains(&angle) {
            tracing::warn!(angle, pulse, "steering angle outside calibration");
        }
        self.controller.set_pulse(pulse)?;
        self.angle = Some(angle);
        Ok(())
    }

    pub fn angle(&self) -> Option<f32> {
        self.angle
    }

    pub fn pulse(&self) -> Option<i32> {
        self.controller.pulse()
    }

    pub fn calibration(&self) -> SteeringCalibration {
        self.calibration
    }

    pub fn controller(&self) -> &P {
        &self.controller
    }

    pub fn into_controller(self) -> P {
        self.controller
    }
}
