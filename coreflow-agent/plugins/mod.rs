//! Monitoring configs: one counter program plus the formulas that turn its
//! normalized samples into table rows

pub mod common;
pub mod haswell;
pub mod sandybridge;

use serde::Serialize;
use std::time::Duration;

use crate::common::arch::Family;
use crate::counters::CounterProgram;
use crate::error::{CoreflowError, Result};
use crate::metrics::format::{self, ratio};
use crate::metrics::{AggregationPolicy, CounterMetric, Fold, NormalizedSample};

/// Which row a set of cells is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowScope {
    Thread(usize),
    Overall,
}

impl RowScope {
    pub fn label(&self) -> String {
        match self {
            RowScope::Thread(i) => format!("Thread {i}"),
            RowScope::Overall => "Overall".to_string(),
        }
    }
}

/// Everything a formula may look at for one row
pub struct MetricContext<'a> {
    pub scope: RowScope,
    pub sample: &'a NormalizedSample,
    pub elapsed: Duration,
    /// Nominal core clock, when the platform reports it
    pub base_frequency_hz: Option<f64>,
}

impl MetricContext<'_> {
    pub fn pmc(&self, slot: usize) -> f64 {
        self.sample.pmc[slot]
    }

    pub fn ipc(&self) -> Option<f64> {
        ratio(self.sample.instructions, self.sample.active_cycles)
    }

    /// Fraction of active cycles
    pub fn of_cycles(&self, count: f64) -> Option<f64> {
        ratio(count, self.sample.active_cycles)
    }

    /// Events per thousand instructions
    pub fn per_ki(&self, count: f64) -> Option<f64> {
        ratio(1000.0 * count, self.sample.instructions)
    }

    pub fn per_second(&self, count: f64) -> Option<f64> {
        ratio(count, self.elapsed.as_secs_f64())
    }

    /// Instructions per joule of `watts` drawn over the interval
    pub fn instructions_per_joule(&self, watts: Option<f64>) -> Option<f64> {
        ratio(self.sample.instructions, watts? * self.elapsed.as_secs_f64())
    }
}

pub type Formula = fn(&MetricContext<'_>) -> Vec<String>;

/// A named measurement mode
pub struct MonitoringConfig {
    pub name: &'static str,
    pub family: Family,
    /// First column is always "Item", the row label
    pub columns: &'static [&'static str],
    pub help_text: &'static str,
    pub program: CounterProgram,
    /// Folds that differ from what the program's AnyThread bits imply
    pub fold_overrides: &'static [(CounterMetric, Fold)],
    /// Cells after the label, one per remaining column
    pub formula: Formula,
}

impl MonitoringConfig {
    pub fn aggregation_policy(&self) -> AggregationPolicy {
        self.fold_overrides
            .iter()
            .fold(AggregationPolicy::from_program(&self.program), |policy, &(m, f)| {
                policy.with(m, f)
            })
    }

    /// Full row: label followed by the formula's cells
    pub fn compute_row(&self, ctx: &MetricContext<'_>) -> Vec<String> {
        let mut row = Vec::with_capacity(self.columns.len());
        row.push(ctx.scope.label());
        row.extend((self.formula)(ctx));
        row
    }

    /// Help text followed by any per-event caveats
    pub fn full_help(&self) -> String {
        let mut help = self.help_text.to_string();
        for caveat in self.program.caveats() {
            if !help.is_empty() {
                help.push('\n');
            }
            help.push_str(caveat);
        }
        help
    }
}

impl std::fmt::Debug for MonitoringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringConfig")
            .field("name", &self.name)
            .field("family", &self.family)
            .finish()
    }
}

/// Summary served by the HTTP listing and `--list-configs`
#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub name: &'static str,
    pub family: Family,
    pub columns: &'static [&'static str],
    pub help: String,
}

impl From<&MonitoringConfig> for ConfigInfo {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            name: config.name,
            family: config.family,
            columns: config.columns,
            help: config.full_help(),
        }
    }
}

pub fn configs(family: Family) -> &'static [MonitoringConfig] {
    match family {
        Family::SandyBridge => sandybridge::CONFIGS,
        Family::Haswell => haswell::CONFIGS,
    }
}

/// Look up a config by name, ignoring case
pub fn find(family: Family, name: &str) -> Result<&'static MonitoringConfig> {
    configs(family)
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            CoreflowError::UnknownConfig(format!(
                "'{}' is not a {} config (available: {})",
                name,
                family.name(),
                configs(family)
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Active cycles, instructions, IPC
pub(crate) fn core_cells(ctx: &MetricContext<'_>) -> Vec<String> {
    vec![
        format::large_number(ctx.sample.active_cycles),
        format::large_number(ctx.sample.instructions),
        format::fixed2(ctx.ipc()),
    ]
}

/// Package power and instructions per joule; N/A on thread rows
pub(crate) fn package_power_cells(ctx: &MetricContext<'_>) -> Vec<String> {
    let power = ctx.sample.package_power;
    vec![
        format::watts(power),
        optional_large(ctx.instructions_per_joule(power)),
    ]
}

pub(crate) fn optional_large(value: Option<f64>) -> String {
    value
        .map(format::large_number)
        .unwrap_or_else(|| format::NOT_AVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_configs() -> impl Iterator<Item = &'static MonitoringConfig> {
        configs(Family::SandyBridge)
            .iter()
            .chain(configs(Family::Haswell).iter())
    }

    #[test]
    fn test_every_config_is_well_formed() {
        for config in all_configs() {
            assert_eq!(config.columns[0], "Item", "{}", config.name);
            assert!(config.program.validate().is_ok(), "{}", config.name);

            let sample = NormalizedSample {
                instructions: 2_000_000.0,
                active_cycles: 1_000_000.0,
                reference_cycles: 900_000.0,
                pmc: [400_000.0, 300_000.0, 200_000.0, 100_000.0],
                package_power: Some(20.0),
                pp0_power: Some(12.0),
            };
            for scope in [RowScope::Thread(0), RowScope::Overall] {
                let ctx = MetricContext {
                    scope,
                    sample: &sample,
                    elapsed: Duration::from_secs(1),
                    base_frequency_hz: Some(3.4e9),
                };
                let row = config.compute_row(&ctx);
                assert_eq!(row.len(), config.columns.len(), "{}", config.name);
            }
        }
    }

    #[test]
    fn test_zero_sample_renders_without_panicking() {
        let sample = NormalizedSample::default();
        for config in all_configs() {
            let ctx = MetricContext {
                scope: RowScope::Thread(3),
                sample: &sample,
                elapsed: Duration::from_secs(1),
                base_frequency_hz: None,
            };
            let row = config.compute_row(&ctx);
            assert_eq!(row[0], "Thread 3");
            assert_eq!(row.len(), config.columns.len(), "{}", config.name);
        }
    }

    #[test]
    fn test_names_unique_per_family() {
        for family in [Family::SandyBridge, Family::Haswell] {
            let mut names: Vec<_> = configs(family).iter().map(|c| c.name).collect();
            let before = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), before);
        }
    }

    #[test]
    fn test_find() {
        let config = find(Family::Haswell, "l2 cache").unwrap();
        assert_eq!(config.name, "L2 Cache");
        assert!(matches!(
            find(Family::SandyBridge, "L2 Cache"),
            Err(CoreflowError::UnknownConfig(_))
        ));
    }

    #[test]
    fn test_caveats_reach_help() {
        let config = find(Family::Haswell, "Dispatch Stalls").unwrap();
        assert!(config.full_help().contains("undocumented"));
    }
}
