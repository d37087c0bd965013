//! Throttle through an electronic speed controller on a pulse channel.
//!
//! An ESC must see its neutral pulse for a moment before it accepts
//! commands, so `PwmThrottle::new` runs that calibration before handing the
//! actuator out. There is no way to reach `update` without it.

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::utils::{
    controllers::{check_finite, ActuatorError, PulseController},
    math::range::map_range,
};

pub const MIN_THROTTLE: f32 = -1.0;
pub const MAX_THROTTLE: f32 = 1.0;

/// Neutral hold for the ESC arming handshake.
pub const DEFAULT_SETTLE_MS: u32 = 1000;

/// Throttle calibration endpoints.
///
/// The polarity between them depends on the ESC: `max_pulse` may well be
/// below `zero_pulse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseRange {
    pub min_pulse: i32,
    pub max_pulse: i32,
    pub zero_pulse: i32,
}

impl Default for PulseRange {
    fn default() -> Self {
        PulseRange {
            min_pulse: 490,
            max_pulse: 300,
            zero_pulse: 350,
        }
    }
}

impl PulseRange {
    /// Reject a range with no output span.
    pub fn validate(&self) -> Result<(), ActuatorError> {
        if self.min_pulse == self.max_pulse && self.max_pulse == self.zero_pulse {
            return Err(ActuatorError::Configuration(format!(
                "throttle span is empty: every endpoint is {}",
                self.zero_pulse
            )));
        }
        Ok(())
    }

    /// Pulse for `throttle`. Forward maps `[0, 1]` onto `[zero, max]`,
    /// reverse and neutral map `[-1, 0]` onto `[min, zero]`.
    pub fn pulse_for(
        &self,
        throttle: f32,
    ) -> i32 {
        if throttle > 0.0 {
            map_range(throttle, 0.0, MAX_THROTTLE, self.zero_pulse, self.max_pulse)
        } else {
            map_range(throttle, MIN_THROTTLE, 0.0, self.min_pulse, self.zero_pulse)
        }
    }
}

/// ESC throttle.
pub struct PwmThrottle<P> {
    controller: P,
    range: PulseRange,
    throttle: Option<f32>,
}

impl<P: PulseController> PwmThrottle<P> {
    /// Validate `range`, then calibrate: neutral pulse held for `settle_ms`.
    pub fn new<D: DelayNs>(
        controller: P,
        range: PulseRange,
        delay: &mut D,
        settle_ms: u32,
    ) -> Result<Self, ActuatorError> {
        range.validate()?;
        let mut throttle = PwmThrottle {
            controller,
            range,
            throttle: None,
        };
        throttle.calibrate(delay, settle_ms)?;
        Ok(throttle)
    }

    /// Send the neutral pulse and block while the ESC arms.
    pub fn calibrate<D: DelayNs>(
        &mut self,
        delay: &mut D,
        settle_ms: u32,
    ) -> Result<(), ActuatorError> {
        tracing::info!(zero_pulse = self.range.zero_pulse, settle_ms, "calibrating ESC");
        self.controller.set_pulse(self.range.zero_pulse)?;
        delay.delay_ms(settle_ms);
        self.throttle = Some(0.0);
        Ok(())
    }

    /// Drive at `throttle`, `1.0` full forward and `-1.0` full reverse.
    ///
    /// Like steering, nothing is clamped here, but NaN and infinities are
    /// refused.
    pub fn update(
        &mut self,
        throttle: f32,
    ) -> Result<(), ActuatorError> {
        let throttle = check_finite(throttle, MIN_THROTTLE, MAX_THROTTLE)?;
        let pulse = self.range.pulse_for(throttle);
        if !(MIN_THROTTLE..=MAX_THROTTLE).contains(&throttle) {
            tracing::warn!(throttle, pulse, "throttle outside calibration");
        }
        self.controller.set_pulse(pulse)?;
        self.throttle = Some(throttle);
        tracing::debug!(throttle, pulse, "throttle update");
        Ok(())
    }

    pub fn throttle(&self) -> Option<f32> {
        self.throttle
    }

    pub fn pulse(&self) -> Option<i32> {
        self.controller.pulse()
    }

    pub fn range(&self) -> PulseRange {
        self.range
    }

    pub fn controller(&self) -> &P {
        &self.controller
    }

    pub fn into_controller(self) -> P {
        self.controller
    }
}
