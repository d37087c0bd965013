//! Calibrated PWM actuators.
//!
//! - `steering`: servo mapped from `[-1, 1]` (full left .. full right) onto pulses
//! - `throttle`: ESC with a neutral pulse and separate forward/reverse spans

pub mod steering;
pub mod throttle;

pub use steering::{PwmSteering, SteeringCalibration};
pub use throttle::{PulseRange, PwmThrottle};
