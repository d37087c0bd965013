//! Vehicle configuration.
//!
//! Loaded from JSON. Every field has a default, so an empty object `{}` is a
//! valid config describing a DRV8835 differential-drive car.
//!
//! ```json
//! {
//!   "drive_loop_delay_ms": 50,
//!   "mixer": {
//!     "type": "ackermann",
//!     "steering": { "controller": { "kind": "pca9685", "channel": 1 } },
//!     "throttle": { "controller": { "kind": "pca9685", "channel": 0 } }
//!   }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::{
    actuators::{throttle::DEFAULT_SETTLE_MS, PulseRange, SteeringCalibration},
    controllers::{ActuatorError, ControllerConfig, Drv8835Channel},
};

/// Servo channel and its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub calibration: SteeringCalibration,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        SteeringConfig {
            controller: ControllerConfig::Pca9685 {
                channel: 1,
                address: 0x40,
                frequency: 60,
            },
            calibration: SteeringCalibration::default(),
        }
    }
}

/// ESC channel and its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub calibration: PulseRange,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            controller: ControllerConfig::Pca9685 {
                channel: 0,
                address: 0x40,
                frequency: 60,
            },
            calibration: PulseRange::default(),
        }
    }
}

/// How steering and throttle reach the wheels, tagged with `"type"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MixerConfig {
    Ackermann {
        #[serde(default)]
        steering: SteeringConfig,
        #[serde(default)]
        throttle: ThrottleConfig,
    },
    Differential {
        left: ControllerConfig,
        right: ControllerConfig,
    },
}

impl Default for MixerConfig {
    fn default() -> Self {
        // M2 on the left and M1 on the right, as the car is usually wired
        MixerConfig::Differential {
            left: ControllerConfig::Drv8835 {
                channel: Drv8835Channel::M2,
            },
            right: ControllerConfig::Drv8835 {
                channel: Drv8835Channel::M1,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Pause between drive loop ticks.
    pub drive_loop_delay_ms: u64,
    /// Neutral hold during ESC calibration.
    pub settle_ms: u32,
    pub mixer: MixerConfig,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig {
            drive_loop_delay_ms: 50,
            settle_ms: DEFAULT_SETTLE_MS,
            mixer: MixerConfig::default(),
        }
    }
}

fn is_pulse_backend(config: &ControllerConfig) -> bool {
    matches!(
        config,
        ControllerConfig::Pca9685 { .. } | ControllerConfig::Null
    )
}

impl VehicleConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ActuatorError> {
        let config: VehicleConfig = serde_json::from_str(json)
            .map_err(|e| ActuatorError::Configuration(format!("invalid vehicle config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ActuatorError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ActuatorError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loading vehicle config");
        Self::from_json_str(&json)
    }

    /// Check calibrations and that every backend fits its role.
    pub fn validate(&self) -> Result<(), ActuatorError> {
        match &self.mixer {
            MixerConfig::Ackermann { steering, throttle } => {
                steering.calibration.validate()?;
                throttle.calibration.validate()?;
                if !is_pulse_backend(&steering.controller) || !is_pulse_backend(&throttle.controller)
                {
                    return Err(ActuatorError::Configuration(
                        "steering and throttle need pulse channels".into(),
                    ));
                }
                if steering.controller == throttle.controller
                    && steering.controller != ControllerConfig::Null
                {
                    return Err(ActuatorError::Configuration(
                        "steering and throttle share one channel".into(),
                    ));
                }
            }
            MixerConfig::Differential { left, right } => {
                let is_servo = |c: &ControllerConfig| matches!(c, ControllerConfig::Pca9685 { .. });
                if is_servo(left) || is_servo(right) {
                    return Err(ActuatorError::Configuration(
                        "wheels need signed-speed motors".into(),
                    ));
                }
                if left == right && *left != ControllerConfig::Null {
                    return Err(ActuatorError::Configuration(
                        "left and right wheel share one motor".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
