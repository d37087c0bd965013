//! Math utilities for the drive core.
//!
//! This module provides the linear range mapping used by every calibrated actuator.

pub mod range;
