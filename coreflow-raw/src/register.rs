//! Generic register abstractions for type-safe MSR programming

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// Every layout in this crate is total: any combination of field values
/// encodes to some 64-bit pattern, and decoding never fails. Fields wider
/// than their slot are truncated by `to_msr_value`.
///
/// # Example
///
/// ```
/// use coreflow_raw::register::{field, flag, RegisterLayout};
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_msr_value(&self) -> u64 {
///         (self.enable as u64) | ((self.threshold as u64) << 8)
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self {
///             enable: flag(value, 0),
///             threshold: field(value, 8, 8) as u8,
///         }
///     }
/// }
///
/// let ctl = MyControl::from_msr_value(0x0A01);
/// assert!(ctl.enable);
/// assert_eq!(ctl.threshold, 10);
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Extract `width` bits starting at `shift`
#[inline]
pub const fn field(value: u64, shift: u32, width: u32) -> u64 {
    (value >> shift) & mask(width)
}

/// Test a single bit
#[inline]
pub const fn flag(value: u64, bit: u32) -> bool {
    (value >> bit) & 1 != 0
}

/// Set a single bit when `on`
#[inline]
pub const fn bit_if(on: bool, bit: u32) -> u64 {
    (on as u64) << bit
}

/// All-ones mask of the given bit width (64 and above saturate)
#[inline]
pub const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// A hardware register with address and typed layout
///
/// ```
/// use coreflow_raw::current_arch::core::{msr, GlobalCtrl};
/// use coreflow_raw::register::Register;
///
/// let reg = Register::new(msr::IA32_PERF_GLOBAL_CTRL, GlobalCtrl::all_enabled());
/// assert_eq!(reg.to_msr_value(), 0x7_0000_000F);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    /// MSR address
    pub address: u64,
    /// Typed register layout
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    pub fn new(address: u64, layout: T) -> Self {
        Self { address, layout }
    }

    pub fn with_address(address: u64) -> Self
    where
        T: Default,
    {
        Self {
            address,
            layout: T::default(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    pub fn to_msr_value(&self) -> u64 {
        self.layout.to_msr_value()
    }

    pub fn from_msr_value(&mut self, value: u64) {
        self.layout = T::from_msr_value(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_widths() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(32), 0xFFFF_FFFF);
        assert_eq!(mask(48), 0xFFFF_FFFF_FFFF);
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(mask(70), u64::MAX);
    }

    #[test]
    fn test_field_and_flag() {
        let value = 0xAB_CD00 | (1 << 40);
        assert_eq!(field(value, 8, 8), 0xCD);
        assert_eq!(field(value, 16, 8), 0xAB);
        assert!(flag(value, 40));
        assert!(!flag(value, 41));
        assert_eq!(bit_if(true, 22), 1 << 22);
        assert_eq!(bit_if(false, 22), 0);
    }
}
