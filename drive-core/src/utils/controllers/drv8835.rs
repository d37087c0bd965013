//! Pololu DRV8835 dual motor driver.
//!
//! Each motor is driven by one PWM pin (magnitude) and one direction pin.
//! Both motors live on one chip whose write sets the two speeds together, so
//! the chip sits behind a `SharedBus` and each `Drv8835Controller` owns one
//! channel of it.

use std::sync::Arc;

use embedded_hal::{
    digital::{OutputPin, PinState},
    pwm::SetDutyCycle,
};
use serde::{Deserialize, Serialize};

use super::{check_range, shared::DualMotorDriver, ActuatorError, Motor, SharedBus, Teardown};
use crate::utils::math::range::map_range;

/// Native speed range of the DRV8835 is `-MAX_SPEED..=MAX_SPEED`.
pub const MAX_SPEED: i16 = 480;

/// Motor outputs of the dual driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Drv8835Channel {
    M1,
    M2,
}

impl Drv8835Channel {
    fn index(self) -> usize {
        match self {
            Drv8835Channel::M1 => 0,
            Drv8835Channel::M2 => 1,
        }
    }
}

/// The chip itself: a PWM and direction pin per motor.
pub struct Drv8835<PWM, DIR> {
    m1: (PWM, DIR),
    m2: (PWM, DIR),
}

impl<PWM, DIR> Drv8835<PWM, DIR>
where
    PWM: SetDutyCycle,
    DIR: OutputPin,
{
    pub fn new(
        m1_pwm: PWM,
        m1_dir: DIR,
        m2_pwm: PWM,
        m2_dir: DIR,
    ) -> Self {
        Drv8835 {
            m1: (m1_pwm, m1_dir),
            m2: (m2_pwm, m2_dir),
        }
    }

    fn set_motor(
        (pwm, dir): &mut (PWM, DIR),
        speed: i16,
    ) -> Result<(), ActuatorError> {
        let magnitude = speed.unsigned_abs().min(MAX_SPEED as u16);
        dir.set_state(PinState::from(speed < 0))
            .map_err(ActuatorError::io)?;
        pwm.set_duty_cycle_fraction(magnitude, MAX_SPEED as u16)
            .map_err(ActuatorError::io)
    }
}

impl<PWM, DIR> DualMotorDriver for Drv8835<PWM, DIR>
where
    PWM: SetDutyCycle,
    DIR: OutputPin,
{
    fn max_speed(&self) -> i16 {
        MAX_SPEED
    }

    fn set_speeds(
        &mut self,
        m1: i16,
        m2: i16,
    ) -> Result<(), ActuatorError> {
        Self::set_motor(&mut self.m1, m1)?;
        Self::set_motor(&mut self.m2, m2)
    }
}

/// One motor of a shared dual driver.
///
/// Dropping the controller forces the whole chip off, once.
pub struct Drv8835Controller<D: DualMotorDriver> {
    bus: Arc<SharedBus<D>>,
    channel: Drv8835Channel,
    max_native: i16,
    speed: f32,
    native: i16,
    teardown: Teardown,
}

impl<D: DualMotorDriver> Drv8835Controller<D> {
    /// Claim `channel` of the chip behind `bus` and force the chip off.
    pub fn new(
        bus: Arc<SharedBus<D>>,
        channel: Drv8835Channel,
    ) -> Result<Self, ActuatorError> {
        let max_native = bus.max_speed();
        if max_native <= 0 {
            return Err(ActuatorError::Configuration(format!(
                "dual driver declares max speed {max_native}"
            )));
        }
        bus.force_off()?;
        tracing::info!(?channel, max_native, "DRV8835 channel ready");

        Ok(Drv8835Controller {
            bus,
            channel,
            max_native,
            speed: 0.0,
            native: 0,
            teardown: Teardown::default(),
        })
    }

    pub fn channel(&self) -> Drv8835Channel {
        self.channel
    }

    /// Last speed written in native units.
    pub fn native(&self) -> i16 {
        self.native
    }

    /// Force the chip off. Only the first call writes.
    pub fn shutdown(&mut self) {
        if self.teardown.begin() {
            let result = self.bus.force_off();
            if result.is_ok() {
                self.speed = 0.0;
                self.native = 0;
            }
            self.teardown.finish("drv8835", result);
        }
    }

    pub fn is_released(&self) -> bool {
        self.teardown.is_released()
    }

    pub fn shutdown_error(&self) -> Option<&ActuatorError> {
        self.teardown.error()
    }
}

impl<D: DualMotorDriver> Motor for Drv8835Controller<D> {
    fn turn(
        &mut self,
        speed: f32,
    ) -> Result<(), ActuatorError> {
        self.teardown.ensure_live()?;
        let speed = check_range(speed, -1.0, 1.0)?;
        let max = i32::from(self.max_native);
        let native = map_range(speed, -1.0, 1.0, -max, max) as i16;

        self.bus.write_channel(self.channel.index(), native)?;
        self.speed = speed;
        self.native = native;
        tracing::debug!(channel = ?self.channel, speed, native, "DRV8835 turn");
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.bus.force_off()?;
        self.speed = 0.0;
        self.native = 0;
        Ok(())
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn native_speed(&self) -> Option<i32> {
        Some(i32::from(self.native))
    }
}

impl<D: DualMotorDriver> Drop for Drv8835Controller<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
