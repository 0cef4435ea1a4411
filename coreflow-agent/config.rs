use std::net::SocketAddr;
use std::time::Duration;

use crate::common::arch::{CpuArchitecture, Family};
use crate::error::{CoreflowError, Result};
use crate::plugins::{self, MonitoringConfig};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime settings of the agent, assembled from the command line
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Overrides detection when set
    pub family: Option<Family>,
    /// Config name; the first config of the family when `None`
    pub config_name: Option<String>,
    pub interval: Duration,
    pub listen: SocketAddr,
    pub serve_http: bool,
    /// Print the rendered table every tick
    pub print_table: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            family: None,
            config_name: None,
            interval: DEFAULT_INTERVAL,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            serve_http: true,
            print_table: false,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_INTERVAL {
            return Err(CoreflowError::ConfigError(format!(
                "interval {:?} is below the minimum of {:?}",
                self.interval, MIN_INTERVAL
            )));
        }
        if !self.serve_http && !self.print_table {
            return Err(CoreflowError::ConfigError(
                "nothing to do: HTTP is disabled and table printing is off".to_string(),
            ));
        }
        Ok(())
    }

    /// The explicit family, else the one matching the detected part
    pub fn resolve_family(&self, detected: CpuArchitecture) -> Result<Family> {
        if let Some(family) = self.family {
            if detected.family() != Some(family) {
                tracing::warn!(
                    "Using {} configs on a {} CPU",
                    family.name(),
                    detected.name()
                );
            }
            return Ok(family);
        }
        detected.family().ok_or_else(|| {
            CoreflowError::UnsupportedArchitecture(format!(
                "no monitoring configs for {} (pass --family to force one)",
                detected.name()
            ))
        })
    }

    pub fn resolve_config(&self, family: Family) -> Result<&'static MonitoringConfig> {
        match &self.config_name {
            Some(name) => plugins::find(family, name),
            None => plugins::configs(family).first().ok_or_else(|| {
                CoreflowError::UnknownConfig(format!("{} has no configs", family.name()))
            }),
        }
    }
}
