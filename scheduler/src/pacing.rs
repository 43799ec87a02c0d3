//! Speed-to-cycle-count mapping.
//!
//! This module deals with the relationship between the user-facing
//! speed setting and the number of simulated instructions executed
//! per display frame.
//!
//! The model is piecewise with a knee at speed 20: linear below the
//! knee (down to a fraction of a cycle per frame, so very slow runs
//! still advance), exponential above it (up to a ceiling of 8192
//! cycles per 1/60s reference frame at speed 100).  Both branches
//! meet at exactly one cycle per reference frame, so the mapping is
//! continuous across the knee.
//!
//! Cycle counts are expressed per *reference* frame (60 Hz) and
//! divided by the refresh-rate scale, so a 144 Hz display executes
//! proportionally fewer cycles per frame and simulated time advances
//! at the same wall-clock rate on every display.

use conv::prelude::*;

/// Slowest selectable speed.
pub const SPEED_MIN: u32 = 1;

/// Fastest selectable speed; "Run" mode, no inter-cycle delay.
pub const SPEED_MAX: u32 = 100;

/// Below this speed the cycle curve is linear, at and above it
/// exponential.
pub const SPEED_KNEE: u32 = 20;

/// Cycles per 1/60s reference frame at `SPEED_MAX`.
const CYCLE_CEILING_AT_60HZ: f64 = 8192.0;

/// Time constant of the exponential branch of the cycle curve.
const CYCLE_CURVE_SCALE: f64 = 32.8123;

/// The inter-cycle delay is 25000us at the knee, decaying by this
/// factor per speed increment down to roughly 2us just below
/// `SPEED_MAX`.
const DELAY_DECAY_PER_SPEED: f64 = 1.124_911_910_364_427_6;

/// Delay-curve coefficient: 25000us scaled back from the knee to a
/// nominal speed of zero.
const DELAY_AT_ZERO_SPEED_US: f64 = 263_214.802_590_498_7;

/// Restricts a speed value to the supported `[SPEED_MIN, SPEED_MAX]`
/// range.  Out-of-range input must never reach the curve evaluation
/// (a speed of zero would produce a negative cycle count in the
/// linear branch).
#[must_use]
pub fn clamp_speed(speed: u32) -> u32 {
    speed.clamp(SPEED_MIN, SPEED_MAX)
}

/// Converts an estimated frame interval into the normalisation factor
/// applied to per-reference-frame cycle counts.
///
/// An estimate of `None` (fewer than two frame samples yet), or a
/// degenerate zero/negative/non-finite interval, yields the reference
/// scale of 1.0 rather than propagating a division by zero.
#[must_use]
pub fn refresh_rate_scale(estimated_frame_interval_ms: Option<f64>) -> f64 {
    match estimated_frame_interval_ms {
        Some(interval) if interval.is_finite() && interval > 0.0 => {
            (1.0 / 60.0 * 1000.0) / interval
        }
        _ => 1.0,
    }
}

/// The (possibly fractional) number of simulated cycles to execute
/// before the next display update.
///
/// `refresh_rate_scale` is the factor produced by
/// [`refresh_rate_scale`]; at the reference scale of 1.0 the result
/// ranges from 1/30 of a cycle at speed 1 up to 8192 cycles at speed
/// 100.
#[must_use]
pub fn cycles_per_frame(speed: u32, refresh_rate_scale: f64) -> f64 {
    let speed = clamp_speed(speed);
    let s = f64::from(speed);
    if speed >= SPEED_KNEE {
        let c = ((CYCLE_CEILING_AT_60HZ - 1.0) / refresh_rate_scale)
            / ((100.0 / CYCLE_CURVE_SCALE).exp() - (20.0 / CYCLE_CURVE_SCALE).exp());
        let b = 1.0 / refresh_rate_scale - c * (20.0 / CYCLE_CURVE_SCALE).exp();
        c * (s / CYCLE_CURVE_SCALE).exp() + b
    } else {
        (29.0 * s - 10.0) / (570.0 * refresh_rate_scale)
    }
}

/// The delay, in microseconds, a self-paced engine should insert
/// between consecutive cycles at the given speed.
///
/// Ranges from half a second per cycle at speed 1 down to about two
/// microseconds just below `SPEED_MAX`; at `SPEED_MAX` there is no
/// delay at all.
#[must_use]
pub fn cycle_delay_micros(speed: u32) -> u64 {
    let speed = clamp_speed(speed);
    let micros: f64 = if speed >= SPEED_MAX {
        0.0
    } else if speed >= SPEED_KNEE {
        (DELAY_AT_ZERO_SPEED_US * DELAY_DECAY_PER_SPEED.powi(-(speed as i32))).round()
    } else {
        (-23750.0 * f64::from(speed) + 0.5e6).round()
    };
    // The curve is bounded by its value at SPEED_MIN, so the
    // conversion cannot fail; treat a failure as "no delay" anyway.
    micros.approx_as::<u64>().unwrap_or(0)
}
