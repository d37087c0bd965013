//! Core actuator drivers and utilities for RC-style and differential-drive cars.
//!
//! For a runnable simulated car, see the `sim-car` binary under `drive-app/`.

pub mod utils;
