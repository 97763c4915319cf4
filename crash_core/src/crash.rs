//! Crash-point sampling.
//!
//! An inverse-uniform distribution: `0.99 / (1 - r)` truncated to hundredths,
//! preceded by a flat instant-crash band `[0, p)` that always busts at 1.00.
//! The 0.99 numerator carries a 1% edge on top of the instant-crash band.

/// Numerator of the inverse-uniform curve.
pub const PAYOUT_NUMERATOR: f64 = 0.99;

/// Crash point of the instant-crash band.
pub const INSTANT_CRASH_POINT: f64 = 1.00;

/// Lowest crash point outside the instant-crash band.
pub const MIN_CRASH_POINT: f64 = 1.01;

/// Default probability of an instant crash at 1.00.
pub const DEFAULT_INSTANT_CRASH_PROBABILITY: f64 = 0.03;

/// Map a uniform draw `r` in `[0, 1)` to a crash point.
///
/// The instant-crash check runs first and short-circuits the curve.
pub fn crash_point_from_uniform(r: f64, instant_crash_probability: f64) -> f64 {
    if r < instant_crash_probability {
        return INSTANT_CRASH_POINT;
    }
    let val = PAYOUT_NUMERATOR / (1.0 - r);
    MIN_CRASH_POINT.max(truncate_hundredths(val))
}

/// Truncate towards zero at two decimals, `floor(v * 100) / 100`.
pub fn truncate_hundredths(v: f64) -> f64 {
    (v * 100.0).floor() / 100.0
}
