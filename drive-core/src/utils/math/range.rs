//! Linear mapping from a normalized command domain onto integer hardware units.
//!
//! # Example
//! ```rust
//! use drive_core::utils::math::range::map_range;
//! // full left .. full right onto servo pulses
//! assert_eq!(map_range(0.0, -1.0, 1.0, 290, 490), 390);
//! ```

/// Map `x` from `[x_min, x_max]` onto `[y_min, y_max]`, flooring the result.
///
/// No clamping is done: an `x` outside its domain extrapolates past the
/// output range. `x_max != x_min` is the caller's responsibility.
pub fn map_range(
    x: f32,
    x_min: f32,
    x_max: f32,
    y_min: i32,
    y_max: i32,
) -> i32 {
    let x_span = f64::from(x_max) - f64::from(x_min);
    let y_span = f64::from(y_max) - f64::from(y_min);
    let y = (f64::from(x) - f64::from(x_min)) * y_span / x_span + f64::from(y_min);
    libm::floor(y) as i32
}
