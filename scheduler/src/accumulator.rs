//! Whole-cycle resolution of fractional per-frame cycle counts.
//!
//! At very low speeds the curve asks for less than one cycle per
//! frame (e.g. 0.25 cycles at 60 Hz is one instruction every four
//! frames).  Instructions only execute whole, so the fraction is
//! banked across frames: once enough frames have been skipped that
//! the banked amount reaches one cycle, exactly one step is emitted
//! and the bank drains.  No cycle is ever lost or emitted twice.

use conv::prelude::*;

/// Leaky-bucket accumulator for sub-frame cycle rates.
#[derive(Debug, Default)]
pub struct CycleAccumulator {
    skip_count: u32,
}

impl CycleAccumulator {
    #[must_use]
    pub fn new() -> CycleAccumulator {
        CycleAccumulator { skip_count: 0 }
    }

    /// Converts this frame's (possibly fractional) cycle count into
    /// the integer number of instructions to execute right now.
    ///
    /// A count of one or more resolves immediately to its integer
    /// part and leaves the skip counter alone.  A fractional count
    /// increments the skip counter; the frame on which
    /// `skip_count * draw_cycle` reaches 1.0 emits exactly one step
    /// and resets the counter.
    pub fn resolve(&mut self, draw_cycle: f64) -> u64 {
        if draw_cycle >= 1.0 {
            match draw_cycle.floor().approx_as::<u64>() {
                Ok(steps) => steps,
                Err(_) => u64::MAX,
            }
        } else if draw_cycle > 0.0 {
            self.skip_count += 1;
            if f64::from(self.skip_count) * draw_cycle >= 1.0 {
                self.skip_count = 0;
                1
            } else {
                0
            }
        } else {
            0
        }
    }

    /// Drops any banked fraction (used on init/reset so a previous
    /// run's skipped frames cannot leak into the next).
    pub fn reset(&mut self) {
        self.skip_count = 0;
    }
}
