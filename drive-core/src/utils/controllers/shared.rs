//! Serialized access to one physical two-channel motor chip.
//!
//! The chip's native write sets both channel speeds at once, so each logical
//! channel keeps its slot in `SharedBus` and resubmits the full pair while
//! holding the guard. The guard is held for the I/O call only.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ActuatorError;

/// A chip that drives two motors with one write.
pub trait DualMotorDriver {
    /// Largest native speed magnitude the chip accepts.
    fn max_speed(&self) -> i16;

    /// Write both channel speeds in native units.
    fn set_speeds(
        &mut self,
        m1: i16,
        m2: i16,
    ) -> Result<(), ActuatorError>;
}

struct SharedDriverState<D> {
    driver: D,
    speeds: [i16; 2],
}

/// One physical dual driver shared by its two channel controllers.
///
/// Wrap in an `Arc` and hand a clone to each `Drv8835Controller`.
pub struct SharedBus<D> {
    state: Mutex<SharedDriverState<D>>,
}

impl<D: DualMotorDriver> SharedBus<D> {
    pub fn new(driver: D) -> Self {
        SharedBus {
            state: Mutex::new(SharedDriverState {
                driver,
                speeds: [0, 0],
            }),
        }
    }

    // A panic on another thread must not keep the chip from being written,
    // least of all by the forced-off path.
    fn lock(&self) -> MutexGuard<'_, SharedDriverState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_speed(&self) -> i16 {
        self.lock().driver.max_speed()
    }

    /// Last pair accepted by the chip.
    pub fn speeds(&self) -> [i16; 2] {
        self.lock().speeds
    }

    /// Set one channel and resubmit the pair. On failure the recorded pair is
    /// left as it was.
    pub fn write_channel(
        &self,
        index: usize,
        speed: i16,
    ) -> Result<(), ActuatorError> {
        let mut state = self.lock();
        let mut next = state.speeds;
        next[index] = speed;
        state.driver.set_speeds(next[0], next[1])?;
        state.speeds = next;
        Ok(())
    }

    /// Drive both channels to zero. On failure the recorded pair is left as
    /// it was.
    pub fn force_off(&self) -> Result<(), ActuatorError> {
        let mut state = self.lock();
        state.driver.set_speeds(0, 0)?;
        state.speeds = [0, 0];
        Ok(())
    }
}
