//! RAPL (Running Average Power Limit) energy-status definitions
//!
//! Energy-status registers are 32-bit, read-only, and count in units of
//! `1 / 2^ESU` joules where ESU comes from `MSR_RAPL_POWER_UNIT`. They wrap
//! after a few minutes at full load, so consumers must keep their own
//! baseline and subtract modulo 2^32.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.10: Platform Specific Power Management Support

use crate::register::{field, RegisterLayout};

/// Width of every energy-status counter
pub const ENERGY_STATUS_WIDTH: u32 = 32;

/// MSR addresses for RAPL
pub mod msr {
    /// Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u64 = 0x606;

    /// Whole-package energy consumption
    pub const MSR_PKG_ENERGY_STATUS: u64 = 0x611;

    /// PP0 (core plane) energy consumption
    pub const MSR_PP0_ENERGY_STATUS: u64 = 0x639;

    /// PP1 (uncore/graphics plane), client parts only
    pub const MSR_PP1_ENERGY_STATUS: u64 = 0x641;

    pub const MSR_DRAM_ENERGY_STATUS: u64 = 0x619;
}

/// RAPL Power Unit register layout
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)            |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)         |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)           |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerUnit {
    pub power_units: u8,
    pub energy_units: u8,
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    fn to_msr_value(&self) -> u64 {
        (self.power_units as u64 & 0x0F)
            | ((self.energy_units as u64 & 0x1F) << 8)
            | ((self.time_units as u64 & 0x0F) << 16)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: field(value, 0, 4) as u8,
            energy_units: field(value, 8, 5) as u8,
            time_units: field(value, 16, 4) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_units > 15 {
            return Err("Power units must be <= 15 (4 bits)");
        }
        if self.energy_units > 31 {
            return Err("Energy units must be <= 31 (5 bits)");
        }
        if self.time_units > 15 {
            return Err("Time units must be <= 15 (4 bits)");
        }
        Ok(())
    }
}

impl RaplPowerUnit {
    /// Joules per LSB of an energy-status register
    pub fn joules_per_unit(&self) -> f64 {
        1.0 / (1u64 << self.energy_units) as f64
    }

    /// Watts per LSB of a power-limit field
    pub fn watts_per_unit(&self) -> f64 {
        1.0 / (1u64 << self.power_units) as f64
    }
}

/// Raw energy count held in the low 32 bits of an energy-status register
pub fn energy_status_count(value: u64) -> u32 {
    field(value, 0, ENERGY_STATUS_WIDTH) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_unit_decode() {
        // Typical Haswell value: PU=3, ESU=14, TU=10
        let unit = RaplPowerUnit::from_msr_value(0x000A_0E03);
        assert_eq!(unit.power_units, 3);
        assert_eq!(unit.energy_units, 14);
        assert_eq!(unit.time_units, 10);
        assert!(unit.validate().is_ok());
        assert_eq!(unit.joules_per_unit(), 1.0 / 16384.0);
        assert_eq!(unit.watts_per_unit(), 0.125);
        assert_eq!(unit.to_msr_value(), 0x000A_0E03);
    }

    #[test]
    fn test_energy_status_ignores_reserved_bits() {
        assert_eq!(energy_status_count(0xDEAD_0000_1234_5678), 0x1234_5678);
    }
}
