//! Hardware backends for steering servos, ESCs and DC motors.
//!
//! Two operation shapes are exposed:
//!
//! - `PulseController`: absolute pulse on one PWM channel (servo, ESC).
//! - `Motor`: signed speed in `[-1, 1]` on one DC motor.
//!
//! The concrete backend is picked from a tagged `ControllerConfig` at
//! construction time.
//!
//! - `i2c`: PCA9685 pulse channel and Adafruit Motor HAT motors over I2C
//! - `drv8835`: Pololu DRV8835 dual driver, two motors behind one `SharedBus`
//! - `null`: simulated backends that only record what they were told

pub mod drv8835;
pub mod i2c;
pub mod null;
pub mod shared;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use drv8835::{Drv8835, Drv8835Channel, Drv8835Controller};
pub use i2c::{MotorHatController, Pca9685PulseController};
pub use null::{NullController, NullPulseController};
pub use shared::{DualMotorDriver, SharedBus};

/// Errors raised by actuators and their hardware backends.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuatorError {
    /// A command outside its declared domain.
    #[error("value {value} outside [{min}, {max}]")]
    Range { value: f32, min: f32, max: f32 },
    /// Degenerate calibration or a backend that cannot serve the request.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The write to the physical chip failed.
    #[error("hardware I/O error: {0}")]
    HardwareIo(String),
    /// The backend has already been forced off for good.
    #[error("controller already released")]
    Released,
}

impl ActuatorError {
    pub(crate) fn io<E: core::fmt::Debug>(err: E) -> Self {
        ActuatorError::HardwareIo(format!("{err:?}"))
    }
}

/// Reject `value` unless it lies in `[min, max]`. NaN is rejected too.
pub fn check_range(
    value: f32,
    min: f32,
    max: f32,
) -> Result<f32, ActuatorError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ActuatorError::Range { value, min, max })
    }
}

/// Reject NaN and infinities, which have no extrapolated value.
///
/// Finite values outside `[min, max]` pass; `min` and `max` only label the
/// error.
pub fn check_finite(
    value: f32,
    min: f32,
    max: f32,
) -> Result<f32, ActuatorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ActuatorError::Range { value, min, max })
    }
}

/// A channel that takes an absolute pulse value.
///
/// Bounds are the calling actuator's job; backends only reject what the
/// hardware physically cannot represent.
pub trait PulseController {
    fn set_pulse(
        &mut self,
        pulse: i32,
    ) -> Result<(), ActuatorError>;

    /// Last pulse written, `None` before the first write.
    fn pulse(&self) -> Option<i32>;
}

/// A DC motor driven by a signed speed, `1.0` full forward and `-1.0` full reverse.
pub trait Motor {
    /// Set the motor speed.
    ///
    /// # Errors
    ///
    /// `ActuatorError::Range` when `|speed| > 1`. Nothing is clamped here;
    /// the mixer feeding this motor owns the clamp.
    fn turn(
        &mut self,
        speed: f32,
    ) -> Result<(), ActuatorError>;

    /// Force the motor off.
    fn turn_off(&mut self) -> Result<(), ActuatorError>;

    /// Last commanded speed.
    fn speed(&self) -> f32;

    /// Last speed in the chip's native units, if it has any.
    fn native_speed(&self) -> Option<i32> {
        None
    }
}

/// Tracks the one-shot forced-off at teardown.
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    released: bool,
    error: Option<ActuatorError>,
}

impl Teardown {
    /// True the first time only.
    pub(crate) fn begin(&mut self) -> bool {
        !core::mem::replace(&mut self.released, true)
    }

    pub(crate) fn finish(
        &mut self,
        name: &str,
        result: Result<(), ActuatorError>,
    ) {
        match result {
            Ok(()) => tracing::info!(controller = name, "forced off"),
            Err(e) => {
                tracing::error!(controller = name, error = %e, "forced off failed");
                self.error = Some(e);
            }
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ActuatorError> {
        if self.released {
            Err(ActuatorError::Released)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn error(&self) -> Option<&ActuatorError> {
        self.error.as_ref()
    }
}

fn default_pca9685_address() -> u8 {
    i2c::PCA9685_DEFAULT_ADDRESS
}

fn default_frequency() -> u16 {
    i2c::DEFAULT_FREQUENCY
}

fn default_motor_hat_address() -> u8 {
    i2c::MOTOR_HAT_DEFAULT_ADDRESS
}

/// Backend selection, serialized as JSON with tag `"kind"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerConfig {
    /// One PCA9685 PWM channel (servo or ESC).
    Pca9685 {
        channel: u8,
        #[serde(default = "default_pca9685_address")]
        address: u8,
        #[serde(default = "default_frequency")]
        frequency: u16,
    },
    /// One motor (1..=4) of an Adafruit DC Motor HAT.
    MotorHat {
        motor: u8,
        #[serde(default = "default_motor_hat_address")]
        address: u8,
    },
    /// One channel of the Pololu DRV8835 dual driver.
    Drv8835 { channel: Drv8835Channel },
    /// No hardware.
    Null,
}

/// Signed-speed backend chosen from a `ControllerConfig`.
pub enum SpeedController<I2C, D>
where
    I2C: embedded_hal::i2c::I2c,
    D: DualMotorDriver,
{
    MotorHat(MotorHatController<I2C>),
    Drv8835(Drv8835Controller<D>),
    Null(NullController),
}

impl<I2C, D> SpeedController<I2C, D>
where
    I2C: embedded_hal::i2c::I2c,
    D: DualMotorDriver,
{
    /// Build the backend named by `config`.
    ///
    /// `i2c` is only consumed by the Motor HAT; `shared` must be present for
    /// a DRV8835 channel.
    pub fn from_config(
        config: &ControllerConfig,
        i2c: I2C,
        shared: Option<&Arc<SharedBus<D>>>,
    ) -> Result<Self, ActuatorError> {
        match *config {
            ControllerConfig::MotorHat { motor, address } => Ok(SpeedController::MotorHat(
                MotorHatController::new(i2c, address, motor)?,
            )),
            ControllerConfig::Drv8835 { channel } => {
                let bus = shared.ok_or_else(|| {
                    ActuatorError::Configuration("DRV8835 channel without a shared bus".into())
                })?;
                Ok(SpeedController::Drv8835(Drv8835Controller::new(
                    Arc::clone(bus),
                    channel,
                )?))
            }
            ControllerConfig::Null => Ok(SpeedController::Null(NullController::new())),
            ControllerConfig::Pca9685 { .. } => Err(ActuatorError::Configuration(
                "a PCA9685 pulse channel cannot drive a wheel motor".into(),
            )),
        }
    }

    /// Force off now instead of waiting for drop.
    pub fn shutdown(&mut self) {
        match self {
            SpeedController::MotorHat(m) => m.shutdown(),
            SpeedController::Drv8835(m) => m.shutdown(),
            SpeedController::Null(m) => m.shutdown(),
        }
    }
}

impl<I2C, D> Motor for SpeedController<I2C, D>
where
    I2C: embedded_hal::i2c::I2c,
    D: DualMotorDriver,
{
    fn turn(
        &mut self,
        speed: f32,
    ) -> Result<(), ActuatorError> {
        match self {
            SpeedController::MotorHat(m) => m.turn(speed),
            SpeedController::Drv8835(m) => m.turn(speed),
            SpeedController::Null(m) => m.turn(speed),
        }
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        match self {
            SpeedController::MotorHat(m) => m.turn_off(),
            SpeedController::Drv8835(m) => m.turn_off(),
            SpeedController::Null(m) => m.turn_off(),
        }
    }

    fn speed(&self) -> f32 {
        match self {
            SpeedController::MotorHat(m) => m.speed(),
            SpeedController::Drv8835(m) => m.speed(),
            SpeedController::Null(m) => m.speed(),
        }
    }

    fn native_speed(&self) -> Option<i32> {
        match self {
            SpeedController::MotorHat(m) => m.native_speed(),
            SpeedController::Drv8835(m) => m.native_speed(),
            SpeedController::Null(m) => m.native_speed(),
        }
    }
}

/// Speeds visited by `sweep`.
pub const SWEEP_SPEEDS: [f32; 7] = [-0.5, -1.0, -0.5, 0.0, 0.5, 1.0, 0.0];

/// Bench test: step the motor through `SWEEP_SPEEDS`, dwelling at each one.
pub fn sweep<M, D>(
    motor: &mut M,
    delay: &mut D,
    dwell_ms: u32,
) -> Result<(), ActuatorError>
where
    M: Motor,
    D: DelayNs,
{
    for speed in SWEEP_SPEEDS {
        motor.turn(speed)?;
        delay.delay_ms(dwell_ms);
        tracing::info!(speed = motor.speed(), native = ?motor.native_speed(), "sweep step");
    }
    tracing::info!("motor sweep complete");
    Ok(())
}

/// `DelayNs` backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}
