//! # coreflow-raw
//!
//! Register definitions for Intel core performance monitoring.
//!
//! This crate provides type-safe layouts for the core PMU MSRs (event
//! selects, fixed-counter control, global control), the RAPL energy-status
//! registers, and a thin wrapper over the Linux `/dev/cpu/<n>/msr` device.
//!
//! ## Usage
//!
//! ```no_run
//! use coreflow_raw::current_arch::core::{msr, PerfEvtSel};
//! use coreflow_raw::{MsrDevice, RegisterLayout};
//!
//! // Count retired branches in user and kernel mode
//! let evtsel = PerfEvtSel::counting(0xC4, 0x00);
//!
//! let device = MsrDevice::open(0)?;
//! device.write(msr::IA32_PERFEVTSEL0, evtsel.to_msr_value())?;
//! # Ok::<(), coreflow_raw::MsrError>(())
//! ```

pub mod arch;
pub mod msr;
pub mod register;

pub use msr::{read_msr, write_msr, MsrDevice, MsrError, Result};
pub use register::{Register, RegisterLayout};

#[cfg(feature = "intel")]
pub use arch::intel as current_arch;
