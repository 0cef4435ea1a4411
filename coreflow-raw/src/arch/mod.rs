//! Architecture-specific register definitions
//!
//! - **Intel** (`intel` feature) - Sandy Bridge through Broadwell client and
//!   server parts share one register layout.

#[cfg(feature = "intel")]
pub mod intel;
