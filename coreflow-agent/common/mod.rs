pub mod affinity;
pub mod arch;
pub mod cpuid;
pub mod msr;
pub mod topology;

pub use affinity::{Affinity, AffinityController, AffinityGuard, SchedAffinity, ThreadMask};
pub use arch::{CpuArchitecture, Family, CPU_ARCH};
pub use msr::{DevMsrDriver, MsrDriver};
pub use topology::{LogicalThread, Topology};
