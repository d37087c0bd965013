//! PCA9685-based backends on an I2C bus.
//!
//! `Pca9685PulseController` drives one PWM channel for a steering servo or an
//! ESC. `MotorHatController` drives one DC motor of an Adafruit Motor HAT,
//! which is a PCA9685 feeding two TB6612 H-bridges.
//!
//! Several controllers may address the same bus; hand each one an
//! `embedded_hal_bus::i2c::MutexDevice` (across threads) or `RefCellDevice`.

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address as PwmAddress, Channel, Pca9685};

use super::{check_range, ActuatorError, Motor, PulseController, Teardown};
use crate::utils::math::range::map_range;

/// Factory address of a bare PCA9685 board.
pub const PCA9685_DEFAULT_ADDRESS: u8 = 0x40;
/// Factory address of the Motor HAT's PCA9685.
pub const MOTOR_HAT_DEFAULT_ADDRESS: u8 = 0x60;
/// Servo/ESC refresh rate.
pub const DEFAULT_FREQUENCY: u16 = 60;
/// Largest on/off count of a PCA9685 channel.
pub const MAX_COUNT: u16 = 4095;
/// Native speed range of the Motor HAT is `-MOTOR_HAT_MAX_SPEED..=MOTOR_HAT_MAX_SPEED`.
pub const MOTOR_HAT_MAX_SPEED: i32 = 255;

const OSCILLATOR_HZ: f32 = 25_000_000.0;
/// Motor HAT PWM rate.
const MOTOR_HAT_FREQUENCY: u16 = 1600;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

fn channel(index: u8) -> Result<Channel, ActuatorError> {
    CHANNELS
        .get(usize::from(index))
        .copied()
        .ok_or_else(|| ActuatorError::Configuration(format!("no PCA9685 channel {index}")))
}

/// Prescale register value for an output `frequency` in Hz.
///
/// The chip accepts prescales 3..=255, roughly 24 Hz to 1.6 kHz.
pub fn prescale(frequency: u16) -> Result<u8, ActuatorError> {
    let value = libm::roundf(OSCILLATOR_HZ / (4096.0 * f32::from(frequency))) - 1.0;
    if frequency == 0 || !(3.0..=255.0).contains(&value) {
        return Err(ActuatorError::Configuration(format!(
            "PWM frequency {frequency} Hz out of the PCA9685 prescale range"
        )));
    }
    Ok(value as u8)
}

/// Enable the chip and program its output frequency.
fn configure<I2C: I2c>(
    pca: &mut Pca9685<I2C>,
    frequency: u16,
) -> Result<(), ActuatorError> {
    let prescale = prescale(frequency)?;
    pca.enable().map_err(ActuatorError::io)?;
    pca.set_prescale(prescale).map_err(ActuatorError::io)?;
    tracing::info!(frequency, prescale, "PCA9685 configured");
    Ok(())
}

/// One PCA9685 channel taking absolute pulse counts.
pub struct Pca9685PulseController<I2C: I2c> {
    pca: Pca9685<I2C>,
    channel: Channel,
    pulse: Option<i32>,
    teardown: Teardown,
}

impl<I2C: I2c> Pca9685PulseController<I2C> {
    /// Address `channel` of the chip at `address`, running at `frequency` Hz.
    pub fn new(
        i2c: I2C,
        address: u8,
        channel_index: u8,
        frequency: u16,
    ) -> Result<Self, ActuatorError> {
        let channel = channel(channel_index)?;
        let mut pca = Pca9685::new(i2c, PwmAddress::from(address)).map_err(ActuatorError::io)?;
        configure(&mut pca, frequency)?;

        Ok(Pca9685PulseController {
            pca,
            channel,
            pulse: None,
            teardown: Teardown::default(),
        })
    }

    /// Build from a `ControllerConfig::Pca9685`.
    pub fn from_config(
        config: &super::ControllerConfig,
        i2c: I2C,
    ) -> Result<Self, ActuatorError> {
        match *config {
            super::ControllerConfig::Pca9685 {
                channel,
                address,
                frequency,
            } => Self::new(i2c, address, channel, frequency),
            other => Err(ActuatorError::Configuration(format!(
                "{other:?} is not a pulse channel"
            ))),
        }
    }

    /// Stop emitting pulses on the channel. Only the first call writes.
    pub fn shutdown(&mut self) {
        if self.teardown.begin() {
            let result = self
                .pca
                .set_channel_on_off(self.channel, 0, 0)
                .map_err(ActuatorError::io);
            if result.is_ok() {
                self.pulse = Some(0);
            }
            self.teardown.finish("pca9685", result);
        }
    }

    pub fn shutdown_error(&self) -> Option<&ActuatorError> {
        self.teardown.error()
    }
}

impl<I2C: I2c> PulseController for Pca9685PulseController<I2C> {
    fn set_pulse(
        &mut self,
        pulse: i32,
    ) -> Result<(), ActuatorError> {
        self.teardown.ensure_live()?;
        let count = u16::try_from(pulse)
            .ok()
            .filter(|c| *c <= MAX_COUNT)
            .ok_or(ActuatorError::Range {
                value: pulse as f32,
                min: 0.0,
                max: f32::from(MAX_COUNT),
            })?;
        self.pca
            .set_channel_on_off(self.channel, 0, count)
            .map_err(ActuatorError::io)?;
        self.pulse = Some(pulse);
        Ok(())
    }

    fn pulse(&self) -> Option<i32> {
        self.pulse
    }
}

impl<I2C: I2c> Drop for Pca9685PulseController<I2C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Motor HAT pin assignment: (pwm, in1, in2) for motors 1..=4.
const MOTOR_HAT_PINS: [(u8, u8, u8); 4] = [(8, 10, 9), (13, 11, 12), (2, 4, 3), (7, 5, 6)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
    Release,
}

/// One DC motor of an Adafruit Motor HAT.
///
/// Each motor is independent: forcing it off releases only its own bridge.
pub struct MotorHatController<I2C: I2c> {
    pca: Pca9685<I2C>,
    motor: u8,
    pwm: Channel,
    in1: Channel,
    in2: Channel,
    speed: f32,
    native: i32,
    teardown: Teardown,
}

impl<I2C: I2c> MotorHatController<I2C> {
    /// Claim `motor` (1..=4) of the HAT at `address` and release it.
    pub fn new(
        i2c: I2C,
        address: u8,
        motor: u8,
    ) -> Result<Self, ActuatorError> {
        let (pwm, in1, in2) = usize::from(motor)
            .checked_sub(1)
            .and_then(|i| MOTOR_HAT_PINS.get(i))
            .copied()
            .ok_or_else(|| {
                ActuatorError::Configuration(format!("Motor HAT has no motor {motor}"))
            })?;
        let mut pca = Pca9685::new(i2c, PwmAddress::from(address)).map_err(ActuatorError::io)?;
        configure(&mut pca, MOTOR_HAT_FREQUENCY)?;

        let mut hat = MotorHatController {
            pca,
            motor,
            pwm: channel(pwm)?,
            in1: channel(in1)?,
            in2: channel(in2)?,
            speed: 0.0,
            native: 0,
            teardown: Teardown::default(),
        };
        hat.release()?;
        tracing::info!(motor, address, "Motor HAT motor ready");
        Ok(hat)
    }

    pub fn motor(&self) -> u8 {
        self.motor
    }

    /// Last magnitude written, signed by direction, in `-255..=255`.
    pub fn native(&self) -> i32 {
        self.native
    }

    fn set_pin(
        &mut self,
        pin: Channel,
        high: bool,
    ) -> Result<(), ActuatorError> {
        if high {
            self.pca.set_channel_off(pin, 0).map_err(ActuatorError::io)?;
            self.pca
                .set_channel_full_on(pin, 0)
                .map_err(ActuatorError::io)
        } else {
            self.pca
                .set_channel_full_off(pin)
                .map_err(ActuatorError::io)
        }
    }

    fn run(
        &mut self,
        direction: Direction,
    ) -> Result<(), ActuatorError> {
        let (in1, in2) = (self.in1, self.in2);
        match direction {
            Direction::Forward => {
                self.set_pin(in2, false)?;
                self.set_pin(in1, true)
            }
            Direction::Backward => {
                self.set_pin(in1, false)?;
                self.set_pin(in2, true)
            }
            Direction::Release => {
                self.set_pin(in1, false)?;
                self.set_pin(in2, false)
            }
        }
    }

    fn set_magnitude(
        &mut self,
        magnitude: u16,
    ) -> Result<(), ActuatorError> {
        self.pca
            .set_channel_on_off(self.pwm, 0, magnitude * 16)
            .map_err(ActuatorError::io)
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.run(Direction::Release)?;
        self.set_magnitude(0)?;
        self.speed = 0.0;
        self.native = 0;
        Ok(())
    }

    /// Release the motor. Only the first call writes.
    pub fn shutdown(&mut self) {
        if self.teardown.begin() {
            let result = self.release();
            self.teardown.finish("motor_hat", result);
        }
    }

    pub fn shutdown_error(&self) -> Option<&ActuatorError> {
        self.teardown.error()
    }
}

impl<I2C: I2c> Motor for MotorHatController<I2C> {
    fn turn(
        &mut self,
        speed: f32,
    ) -> Result<(), ActuatorError> {
        self.teardown.ensure_live()?;
        let speed = check_range(speed, -1.0, 1.0)?;
        // map the magnitude so reverse is exactly as strong as forward
        let magnitude = map_range(
            speed.abs(),
            -1.0,
            1.0,
            -MOTOR_HAT_MAX_SPEED,
            MOTOR_HAT_MAX_SPEED,
        )
        .clamp(0, MOTOR_HAT_MAX_SPEED);
        let (direction, native) = if speed > 0.0 {
            (Direction::Forward, magnitude)
        } else if speed < 0.0 {
            (Direction::Backward, -magnitude)
        } else {
            (Direction::Release, 0)
        };
        let magnitude = magnitude as u16;

        self.run(direction)?;
        self.set_magnitude(magnitude)?;
        self.speed = speed;
        self.native = native;
        tracing::debug!(motor = self.motor, speed, native, "Motor HAT turn");
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.release()
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn native_speed(&self) -> Option<i32> {
        Some(self.native)
    }
}

impl<I2C: I2c> Drop for MotorHatController<I2C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
