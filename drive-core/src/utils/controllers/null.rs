//! Simulated backends: they keep what they were told and touch no hardware.
//!
//! Used by tests and to run one side of a differential pair without a motor.

use super::{check_range, ActuatorError, Motor, PulseController, Teardown};

/// Signed-speed backend with no I/O.
#[derive(Debug, Default)]
pub struct NullController {
    speed: f32,
    teardown: Teardown,
}

impl NullController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&mut self) {
        if self.teardown.begin() {
            self.speed = 0.0;
            self.teardown.finish("null", Ok(()));
        }
    }

    pub fn is_released(&self) -> bool {
        self.teardown.is_released()
    }
}

impl Motor for NullController {
    fn turn(
        &mut self,
        speed: f32,
    ) -> Result<(), ActuatorError> {
        self.teardown.ensure_live()?;
        self.speed = check_range(speed, -1.0, 1.0)?;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.speed = 0.0;
        Ok(())
    }

    fn speed(&self) -> f32 {
        self.speed
    }
}

impl Drop for NullController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pulse backend with no I/O. Keeps every pulse it was given, oldest first.
#[derive(Debug, Default)]
pub struct NullPulseController {
    history: Vec<i32>,
}

impl NullPulseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[i32] {
        &self.history
    }
}

impl PulseController for NullPulseController {
    fn set_pulse(
        &mut self,
        pulse: i32,
    ) -> Result<(), ActuatorError> {
        tracing::trace!(pulse, "null pulse");
        self.history.push(pulse);
        Ok(())
    }

    fn pulse(&self) -> Option<i32> {
        self.history.last().copied()
    }
}
