//! Intel core PMU and RAPL register definitions
//!
//! The core PMU layout is architectural from Sandy Bridge onward; the
//! per-family differences live in event tables, not in these registers.
//!
//! - **Core** - event selects, general and fixed counters, global control
//! - **RAPL** - package and core-plane energy status

pub mod core;
pub mod rapl;
