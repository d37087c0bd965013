//! Utility re-exports for the drive core.
//!
//! - `math`: range mapping between normalized commands and hardware units
//! - `controllers`: hardware backends (PCA9685, Motor HAT, DRV8835, null)
//! - `actuators`: calibrated steering servo and throttle ESC
//! - `mixers`: steering/throttle mixing for Ackermann and differential drive
//! - `config`: serde-loadable vehicle configuration

pub mod actuators;
pub mod config;
pub mod controllers;
pub mod math;
pub mod mixers;

pub use actuators::{PwmSteering, PwmThrottle};
pub use config::VehicleConfig;
pub use controllers::{ActuatorError, Motor, PulseController, SpeedController};
pub use math::range::map_range;
pub use mixers::{AckermannMixer, ActuatorMixer, DifferentialDriveMixer};
