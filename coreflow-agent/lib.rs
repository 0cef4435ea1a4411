// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod plugins;
pub mod prom;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AgentConfig;
pub use error::{CoreflowError, Result};
pub use orchestrator::{Poller, Session, Snapshot, UpdateResults};
pub use plugins::MonitoringConfig;
pub use prom::SampleExporter;
