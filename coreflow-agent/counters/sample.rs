// Raw per-thread counter deltas

use coreflow_raw::current_arch::core::{PmuCapabilities, CORE_FIXED_COUNTERS, CORE_PMU_COUNTERS};
use coreflow_raw::register::mask;

/// Bit widths of the general-purpose and fixed counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWidths {
    pub general: u32,
    pub fixed: u32,
}

impl From<PmuCapabilities> for CounterWidths {
    fn from(caps: PmuCapabilities) -> Self {
        Self {
            general: caps.general_width as u32,
            fixed: caps.fixed_width as u32,
        }
    }
}

impl Default for CounterWidths {
    fn default() -> Self {
        PmuCapabilities::default().into()
    }
}

/// Difference between two reads of a `width`-bit counter
///
/// A counter that wrapped between the reads still yields the true count,
/// provided it wrapped at most once.
pub fn counter_delta(earlier: u64, later: u64, width: u32) -> u64 {
    later.wrapping_sub(earlier) & mask(width)
}

/// Counter values of one logical thread for one interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    /// Instructions retired, unhalted core cycles, unhalted reference cycles
    pub fixed: [u64; CORE_FIXED_COUNTERS],
    pub general: [u64; CORE_PMU_COUNTERS],
}

impl RawSample {
    pub fn instructions(&self) -> u64 {
        self.fixed[0]
    }

    pub fn active_cycles(&self) -> u64 {
        self.fixed[1]
    }

    pub fn reference_cycles(&self) -> u64 {
        self.fixed[2]
    }

    /// Per-counter delta from `earlier` to `self`
    pub fn delta_since(&self, earlier: &RawSample, widths: CounterWidths) -> RawSample {
        let mut delta = RawSample::default();
        for i in 0..CORE_FIXED_COUNTERS {
            delta.fixed[i] = counter_delta(earlier.fixed[i], self.fixed[i], widths.fixed);
        }
        for i in 0..CORE_PMU_COUNTERS {
            delta.general[i] = counter_delta(earlier.general[i], self.general[i], widths.general);
        }
        delta
    }
}
