//! Core PMU register definitions for Intel Sandy Bridge and later
//!
//! Architectural performance monitoring, version 3: four general-purpose
//! counters per logical thread (eight with SMT disabled) and three
//! fixed-function counters.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Chapter 18: Performance Monitoring

use crate::register::{bit_if, field, flag, RegisterLayout};

/// Number of general-purpose performance counters per thread with SMT on
pub const CORE_PMU_COUNTERS: usize = 4;

/// Number of fixed-function performance counters
pub const CORE_FIXED_COUNTERS: usize = 3;

/// Counter width assumed when CPUID leaf 0xA is unavailable
pub const DEFAULT_COUNTER_WIDTH: u8 = 48;

/// MSR addresses for the core PMU
pub mod msr {
    /// Performance Event Select registers (IA32_PERFEVTSELx)
    pub const IA32_PERFEVTSEL0: u64 = 0x186;
    pub const IA32_PERFEVTSEL1: u64 = 0x187;
    pub const IA32_PERFEVTSEL2: u64 = 0x188;
    pub const IA32_PERFEVTSEL3: u64 = 0x189;

    /// General-purpose counters (IA32_PMCx)
    pub const IA32_PMC0: u64 = 0xC1;
    pub const IA32_PMC1: u64 = 0xC2;
    pub const IA32_PMC2: u64 = 0xC3;
    pub const IA32_PMC3: u64 = 0xC4;

    /// Fixed-function Performance Counter Control
    pub const IA32_FIXED_CTR_CTRL: u64 = 0x38D;

    /// Fixed-function Performance Counters
    pub const IA32_FIXED_CTR0: u64 = 0x309; // Instructions Retired
    pub const IA32_FIXED_CTR1: u64 = 0x30A; // Unhalted Core Cycles
    pub const IA32_FIXED_CTR2: u64 = 0x30B; // Unhalted Reference Cycles

    pub const IA32_PERF_GLOBAL_STATUS: u64 = 0x38E;
    pub const IA32_PERF_GLOBAL_CTRL: u64 = 0x38F;
    pub const IA32_PERF_GLOBAL_OVF_CTRL: u64 = 0x390;

    /// Maximum non-turbo ratio lives in bits 15:8
    pub const MSR_PLATFORM_INFO: u64 = 0xCE;

    pub const PERFEVTSEL: [u64; 4] = [
        IA32_PERFEVTSEL0,
        IA32_PERFEVTSEL1,
        IA32_PERFEVTSEL2,
        IA32_PERFEVTSEL3,
    ];

    pub const PMC: [u64; 4] = [IA32_PMC0, IA32_PMC1, IA32_PMC2, IA32_PMC3];

    pub const FIXED_CTR: [u64; 3] = [IA32_FIXED_CTR0, IA32_FIXED_CTR1, IA32_FIXED_CTR2];
}

/// Performance Event Select register layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                    |
/// |--------|-------------|--------------------------------|
/// | 0-7    | event_select| Event select                   |
/// | 8-15   | umask       | Unit mask                      |
/// | 16     | usr         | User mode                      |
/// | 17     | os          | OS mode                        |
/// | 18     | edge        | Edge detect                    |
/// | 19     | pc          | Pin control                    |
/// | 20     | int         | APIC interrupt enable          |
/// | 21     | any_thread  | Any thread                     |
/// | 22     | enable      | Enable counter                 |
/// | 23     | invert      | Invert counter mask            |
/// | 24-31  | cmask       | Counter mask                   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PerfEvtSel {
    pub event_select: u8,
    pub umask: u8,
    pub usr: bool,
    pub os: bool,
    pub edge: bool,
    pub pc: bool,
    pub int: bool,
    pub any_thread: bool,
    pub enable: bool,
    pub invert: bool,
    pub cmask: u8,
}

impl PerfEvtSel {
    /// Enabled selector counting in both user and kernel mode
    pub const fn counting(event_select: u8, umask: u8) -> Self {
        Self {
            event_select,
            umask,
            usr: true,
            os: true,
            edge: false,
            pc: false,
            int: false,
            any_thread: false,
            enable: true,
            invert: false,
            cmask: 0,
        }
    }
}

impl RegisterLayout for PerfEvtSel {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.umask as u64) << 8)
            | bit_if(self.usr, 16)
            | bit_if(self.os, 17)
            | bit_if(self.edge, 18)
            | bit_if(self.pc, 19)
            | bit_if(self.int, 20)
            | bit_if(self.any_thread, 21)
            | bit_if(self.enable, 22)
            | bit_if(self.invert, 23)
            | ((self.cmask as u64) << 24)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: field(value, 0, 8) as u8,
            umask: field(value, 8, 8) as u8,
            usr: flag(value, 16),
            os: flag(value, 17),
            edge: flag(value, 18),
            pc: flag(value, 19),
            int: flag(value, 20),
            any_thread: flag(value, 21),
            enable: flag(value, 22),
            invert: flag(value, 23),
            cmask: field(value, 24, 8) as u8,
        }
    }
}

/// Controls for one fixed-function counter (a 4-bit group)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FixedCounterControl {
    pub os: bool,
    pub usr: bool,
    pub any_thread: bool,
    pub pmi: bool,
}

impl FixedCounterControl {
    pub const fn all_rings() -> Self {
        Self {
            os: true,
            usr: true,
            any_thread: false,
            pmi: false,
        }
    }

    pub const fn all_rings_any_thread() -> Self {
        Self {
            os: true,
            usr: true,
            any_thread: true,
            pmi: false,
        }
    }

    fn bits(&self) -> u64 {
        bit_if(self.os, 0) | bit_if(self.usr, 1) | bit_if(self.any_thread, 2) | bit_if(self.pmi, 3)
    }

    fn from_bits(bits: u64) -> Self {
        Self {
            os: flag(bits, 0),
            usr: flag(bits, 1),
            any_thread: flag(bits, 2),
            pmi: flag(bits, 3),
        }
    }
}

/// Fixed Counter Control register layout
///
/// Counter `i` owns bits `4*i .. 4*i+3`: [os, usr, any_thread, pmi].
/// Counter 0 is instructions retired, 1 unhalted core cycles, 2 unhalted
/// reference cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FixedCtrCtrl {
    pub counters: [FixedCounterControl; CORE_FIXED_COUNTERS],
}

impl RegisterLayout for FixedCtrCtrl {
    fn to_msr_value(&self) -> u64 {
        self.counters
            .iter()
            .enumerate()
            .fold(0, |acc, (i, ctr)| acc | (ctr.bits() << (4 * i)))
    }

    fn from_msr_value(value: u64) -> Self {
        let mut counters = [FixedCounterControl::default(); CORE_FIXED_COUNTERS];
        for (i, ctr) in counters.iter_mut().enumerate() {
            *ctr = FixedCounterControl::from_bits(field(value, 4 * i as u32, 4));
        }
        Self { counters }
    }
}

/// Global control: one enable bit per general counter (bits 0..n) and per
/// fixed counter (bits 32..32+m)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GlobalCtrl {
    pub general: [bool; CORE_PMU_COUNTERS],
    pub fixed: [bool; CORE_FIXED_COUNTERS],
}

impl GlobalCtrl {
    pub const fn all_enabled() -> Self {
        Self {
            general: [true; CORE_PMU_COUNTERS],
            fixed: [true; CORE_FIXED_COUNTERS],
        }
    }
}

impl RegisterLayout for GlobalCtrl {
    fn to_msr_value(&self) -> u64 {
        let general = self
            .general
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &on)| acc | bit_if(on, i as u32));
        self.fixed
            .iter()
            .enumerate()
            .fold(general, |acc, (i, &on)| acc | bit_if(on, 32 + i as u32))
    }

    fn from_msr_value(value: u64) -> Self {
        let mut ctrl = Self::default();
        for (i, on) in ctrl.general.iter_mut().enumerate() {
            *on = flag(value, i as u32);
        }
        for (i, on) in ctrl.fixed.iter_mut().enumerate() {
            *on = flag(value, 32 + i as u32);
        }
        ctrl
    }
}

/// MSR_PLATFORM_INFO, only the field used to derive the base clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Maximum non-turbo ratio, in 100 MHz bus-clock units
    pub max_non_turbo_ratio: u8,
}

impl PlatformInfo {
    pub fn base_frequency_hz(&self) -> f64 {
        self.max_non_turbo_ratio as f64 * 100_000_000.0
    }
}

impl RegisterLayout for PlatformInfo {
    fn to_msr_value(&self) -> u64 {
        (self.max_non_turbo_ratio as u64) << 8
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            max_non_turbo_ratio: field(value, 8, 8) as u8,
        }
    }
}

/// Decoded CPUID leaf 0xA (architectural performance monitoring)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmuCapabilities {
    pub version: u8,
    pub general_counters: u8,
    pub general_width: u8,
    pub fixed_counters: u8,
    pub fixed_width: u8,
}

impl PmuCapabilities {
    /// Decode from the EAX and EDX outputs of CPUID leaf 0xA
    ///
    /// Widths reported as zero fall back to [`DEFAULT_COUNTER_WIDTH`].
    pub fn from_cpuid(eax: u32, edx: u32) -> Self {
        let eax = eax as u64;
        let edx = edx as u64;
        let general_width = field(eax, 16, 8) as u8;
        let fixed_width = field(edx, 5, 8) as u8;

        Self {
            version: field(eax, 0, 8) as u8,
            general_counters: field(eax, 8, 8) as u8,
            general_width: if general_width == 0 {
                DEFAULT_COUNTER_WIDTH
            } else {
                general_width
            },
            fixed_counters: field(edx, 0, 5) as u8,
            fixed_width: if fixed_width == 0 {
                DEFAULT_COUNTER_WIDTH
            } else {
                fixed_width
            },
        }
    }
}

impl Default for PmuCapabilities {
    fn default() -> Self {
        Self {
            version: 3,
            general_counters: CORE_PMU_COUNTERS as u8,
            general_width: DEFAULT_COUNTER_WIDTH,
            fixed_counters: CORE_FIXED_COUNTERS as u8,
            fixed_width: DEFAULT_COUNTER_WIDTH,
        }
    }
}
