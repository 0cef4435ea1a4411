// One live monitoring session: program, harvest, normalize, render

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use coreflow_raw::current_arch::core::{msr, PlatformInfo};

use crate::common::affinity::{Affinity, AffinityController};
use crate::common::arch::Family;
use crate::common::msr::MsrDriver;
use crate::common::topology::Topology;
use crate::counters::{CounterIo, CounterWidths, PowerReader, Sampler};
use crate::error::{CoreflowError, Result};
use crate::metrics::{AggregationPolicy, NormalizedSample, Normalizer};
use crate::plugins::{MetricContext, MonitoringConfig, RowScope};

/// Aggregate value of one named counter
#[derive(Debug, Clone, Serialize)]
pub struct CounterTotal {
    pub name: &'static str,
    pub value: f64,
}

/// Everything produced by one tick
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResults {
    pub config: &'static str,
    pub family: Family,
    pub columns: &'static [&'static str],
    /// One row per logical thread, in index order
    pub thread_rows: Vec<Vec<String>>,
    pub overall: Vec<String>,
    pub threads: Vec<NormalizedSample>,
    pub cores: Vec<NormalizedSample>,
    pub aggregate: NormalizedSample,
    pub counter_totals: Vec<CounterTotal>,
    pub elapsed_secs: f64,
}

impl UpdateResults {
    /// Plain-text table: header, one row per thread, then the overall row
    pub fn render_table(&self) -> String {
        let rows: Vec<&Vec<String>> = self
            .thread_rows
            .iter()
            .chain(std::iter::once(&self.overall))
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, header)| {
                rows.iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.len())
                    .chain(std::iter::once(header.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = format!("{} ({})\n", self.config, self.family.name());
        out.push_str(&pad_line(self.columns.iter().copied(), &widths));
        out.push('\n');
        for row in rows {
            out.push_str(&pad_line(row.iter().map(String::as_str), &widths));
            out.push('\n');
        }
        out
    }
}

fn pad_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths.iter())
        .map(|(cell, &w)| format!("{cell:>w$}"))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Owns the driver, the pinning primitive and the live counter program
///
/// Exactly one config is live at a time; [`Session::initialize`] with a
/// different config overwrites the previous program.
pub struct Session {
    driver: Arc<dyn MsrDriver>,
    affinity: AffinityController,
    sampler: Sampler,
    power: PowerReader,
    config: Option<&'static MonitoringConfig>,
    policy: AggregationPolicy,
    base_frequency_hz: Option<f64>,
}

impl Session {
    pub fn new(
        driver: Arc<dyn MsrDriver>,
        affinity: Box<dyn Affinity>,
        topology: Arc<Topology>,
        widths: CounterWidths,
    ) -> Self {
        Self {
            sampler: Sampler::new(Arc::clone(&driver), widths),
            power: PowerReader::new(Arc::clone(&driver)),
            affinity: AffinityController::new(affinity, topology),
            driver,
            config: None,
            policy: AggregationPolicy::default(),
            base_frequency_hz: None,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        self.affinity.topology()
    }

    pub fn config(&self) -> Option<&'static MonitoringConfig> {
        self.config
    }

    pub fn is_live(&self) -> bool {
        self.config.is_some() && self.sampler.is_live()
    }

    /// Program `config` on every logical thread and prime power baselines
    ///
    /// The driver is probed before any register is touched. On failure the
    /// session is left not live and a later call starts from scratch.
    pub fn initialize(&mut self, config: &'static MonitoringConfig) -> Result<()> {
        self.config = None;
        self.driver.probe()?;

        if let Err(e) = self.sampler.program(&mut self.affinity, &config.program) {
            tracing::error!("Failed to program '{}': {}", config.name, e);
            if !e.is_fatal() {
                if let Err(disable_err) = self.sampler.disable(&mut self.affinity) {
                    tracing::warn!("Failed to disable counters: {}", disable_err);
                }
            }
            return Err(e);
        }

        if let Err(e) = self.power.start(&mut self.affinity) {
            tracing::error!("Failed to prime energy counters for '{}': {}", config.name, e);
            if !e.is_fatal() {
                if let Err(disable_err) = self.sampler.disable(&mut self.affinity) {
                    tracing::warn!("Failed to disable counters: {}", disable_err);
                }
            }
            return Err(e);
        }
        self.base_frequency_hz = self.read_base_frequency();
        self.policy = config.aggregation_policy();
        self.config = Some(config);

        tracing::info!(
            "Monitoring '{}' on {} logical threads ({} cores)",
            config.name,
            self.topology().thread_count(),
            self.topology().core_count()
        );
        for caveat in config.program.caveats() {
            tracing::warn!("{}: {}", config.name, caveat);
        }
        Ok(())
    }

    fn read_base_frequency(&mut self) -> Option<f64> {
        let driver = Arc::clone(&self.driver);
        let hz = self.affinity.with_thread(0, |thread| {
            let info = CounterIo::new(driver.as_ref(), thread)
                .read_register::<PlatformInfo>(msr::MSR_PLATFORM_INFO)?;
            Ok(info.layout.base_frequency_hz())
        });
        match hz {
            Ok(hz) if hz > 0.0 => {
                tracing::info!("Base frequency: {:.2} GHz", hz / 1e9);
                Some(hz)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to read base frequency: {}", e);
                None
            }
        }
    }

    /// Harvest one interval of `elapsed` wall-clock time
    ///
    /// A failed tick returns an error and produces no rows; the session
    /// stays live for the next tick.
    pub fn update(&mut self, elapsed: Duration) -> Result<UpdateResults> {
        let config = self.config.ok_or_else(|| {
            CoreflowError::NotInitialized("no monitoring config is live".to_string())
        })?;

        let raw = self.sampler.harvest(&mut self.affinity)?;
        let package = self.power.read_package_energy(&mut self.affinity)?;
        let pp0 = self.power.read_core_plane_energy(&mut self.affinity)?;

        let topology = Arc::clone(self.affinity.topology());
        let normalizer = Normalizer::new(&topology, &raw)?;
        let mut aggregate = normalizer.aggregate(&self.policy);
        aggregate.package_power = package.watts(elapsed);
        aggregate.pp0_power = pp0.watts(elapsed);

        let base_frequency_hz = self.base_frequency_hz;
        let render = |scope: RowScope, sample: &NormalizedSample| {
            config.compute_row(&MetricContext {
                scope,
                sample,
                elapsed,
                base_frequency_hz,
            })
        };
        let thread_rows = normalizer
            .threads()
            .iter()
            .enumerate()
            .map(|(i, sample)| render(RowScope::Thread(i), sample))
            .collect();
        let overall = render(RowScope::Overall, &aggregate);
        let counter_totals = counter_totals(config, &aggregate);

        Ok(UpdateResults {
            config: config.name,
            family: config.family,
            columns: config.columns,
            thread_rows,
            overall,
            threads: normalizer.threads().to_vec(),
            cores: normalizer.per_core(&self.policy),
            aggregate,
            counter_totals,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Disable counting on every thread and drop the live config
    pub fn shutdown(&mut self) -> Result<()> {
        self.config = None;
        if self.sampler.is_live() {
            self.sampler.disable(&mut self.affinity)?;
            tracing::info!("Counters disabled");
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Failed to disable counters on drop: {}", e);
        }
    }
}

fn counter_totals(config: &MonitoringConfig, aggregate: &NormalizedSample) -> Vec<CounterTotal> {
    let mut totals = vec![
        CounterTotal {
            name: "Instructions",
            value: aggregate.instructions,
        },
        CounterTotal {
            name: "Active Cycles",
            value: aggregate.active_cycles,
        },
        CounterTotal {
            name: "Reference Cycles",
            value: aggregate.reference_cycles,
        },
    ];
    for (slot, spec) in config.program.events.iter().enumerate() {
        if let Some(spec) = spec {
            totals.push(CounterTotal {
                name: spec.name,
                value: aggregate.pmc[slot],
            });
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{CounterProgram, EventSelectSpec};
    use crate::metrics::format;
    use crate::plugins::core_cells;
    use crate::testing::{MockAffinity, MockDriver};
    use coreflow_raw::current_arch::core::msr as core_msr;
    use coreflow_raw::current_arch::rapl::msr as rapl_msr;

    fn smt_pair_row(ctx: &MetricContext<'_>) -> Vec<String> {
        let mut cells = core_cells(ctx);
        cells.push(format::large_number(ctx.pmc(0)));
        cells.push(format::watts(ctx.sample.package_power));
        cells
    }

    static SMT_PAIR: MonitoringConfig = MonitoringConfig {
        name: "SMT Pair",
        family: Family::Haswell,
        columns: &["Item", "Active Cycles", "Instructions", "IPC", "Port 0", "Pkg Pwr"],
        help_text: "",
        program: CounterProgram::new([
            Some(EventSelectSpec::new(0xA1, 0x01, "UOPS_DISPATCHED_PORT.PORT_0").any_thread()),
            None,
            None,
            None,
        ])
        .fixed_any_thread(false, true),
        fold_overrides: &[],
        formula: smt_pair_row,
    };

    fn session(
        driver: &Arc<MockDriver>,
        topology: Topology,
    ) -> (Session, Arc<parking_lot::Mutex<Option<u32>>>) {
        let cpus: Vec<u32> = topology.threads().iter().map(|t| t.cpu).collect();
        let affinity = MockAffinity::new(&cpus);
        let switch = affinity.failure_switch();
        let session = Session::new(
            driver.clone(),
            Box::new(affinity),
            Arc::new(topology),
            CounterWidths::default(),
        );
        (session, switch)
    }

    fn one_core_two_threads() -> Topology {
        Topology::from_cpus(&[(0, 0, 0), (1, 0, 0)]).unwrap()
    }

    #[test]
    fn test_smt_pair_aggregate() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());
        session.initialize(&SMT_PAIR).unwrap();

        for cpu in 0..2 {
            driver.set(cpu, core_msr::IA32_FIXED_CTR0, 1_000_000);
            driver.set(cpu, core_msr::IA32_FIXED_CTR1, 500_000);
            driver.set(cpu, core_msr::IA32_PMC0, 250_000);
        }

        let results = session.update(Duration::from_secs(1)).unwrap();
        assert_eq!(results.aggregate.instructions, 2_000_000.0);
        assert_eq!(results.aggregate.active_cycles, 500_000.0);
        assert_eq!(results.aggregate.pmc[0], 250_000.0);
        assert_eq!(results.overall[0], "Overall");
        assert_eq!(results.overall[3], "4.00");
        assert_eq!(results.thread_rows.len(), 2);
        assert_eq!(results.thread_rows[1][0], "Thread 1");
        assert_eq!(results.thread_rows[1][3], "2.00");
        assert_eq!(results.cores.len(), 1);
        assert_eq!(results.counter_totals[3].name, "UOPS_DISPATCHED_PORT.PORT_0");
    }

    #[test]
    fn test_rename_overall_matches_identical_threads() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());
        let rename = crate::plugins::find(Family::Haswell, "Rename").unwrap();
        session.initialize(rename).unwrap();

        // Both siblings see the same core-wide counts
        for cpu in 0..2 {
            driver.set(cpu, core_msr::IA32_FIXED_CTR0, 1_500);
            driver.set(cpu, core_msr::IA32_FIXED_CTR1, 1_000);
            for (slot, value) in [800, 400, 200, 100].into_iter().enumerate() {
                driver.set(cpu, core_msr::PMC[slot], value);
            }
        }

        let results = session.update(Duration::from_secs(1)).unwrap();
        let thread = &results.thread_rows[0];
        assert_eq!(thread, &results.thread_rows[1]);
        assert_eq!(thread[5], "1.50");
        assert_eq!(thread[10], "80.00%");
        // Everything after instructions/IPC is per-core on both sides
        assert_eq!(results.overall[4..], thread[4..]);
        assert_eq!(results.overall[1], thread[1]);
    }

    #[test]
    fn test_parked_thread_renders_not_available() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, Topology::uniform(1, 2, 1).unwrap());
        session.initialize(&SMT_PAIR).unwrap();

        driver.set(0, core_msr::IA32_FIXED_CTR0, 900);
        driver.set(0, core_msr::IA32_FIXED_CTR1, 300);
        // thread 1 parked: no cycles, no instructions

        let results = session.update(Duration::from_secs(1)).unwrap();
        assert_eq!(results.thread_rows[0][3], "3.00");
        assert_eq!(results.thread_rows[1][3], "N/A");
        assert_eq!(results.overall[3], "3.00");
    }

    #[test]
    fn test_package_power_over_one_second() {
        let driver = MockDriver::new();
        driver.set(0, rapl_msr::MSR_RAPL_POWER_UNIT, 0x000A_0E03);
        driver.set(0, rapl_msr::MSR_PKG_ENERGY_STATUS, 5_000);
        let (mut session, _) = session(&driver, one_core_two_threads());
        session.initialize(&SMT_PAIR).unwrap();

        driver.set(0, rapl_msr::MSR_PKG_ENERGY_STATUS, 5_000 + 15 * 16_384);
        let results = session.update(Duration::from_millis(1_000)).unwrap();
        assert_eq!(results.overall[5], "15.00 W");
        assert_eq!(results.thread_rows[0][5], "N/A");
    }

    #[test]
    fn test_unavailable_driver_touches_nothing() {
        let driver = MockDriver::unavailable();
        let (mut session, _) = session(&driver, one_core_two_threads());

        let err = session.initialize(&SMT_PAIR).unwrap_err();
        assert!(matches!(err, CoreflowError::DriverUnavailable(_)));
        assert!(driver.writes().is_empty());
        assert!(!session.is_live());
        assert!(matches!(
            session.update(Duration::from_secs(1)),
            Err(CoreflowError::NotInitialized(_))
        ));

        driver.set_available(true);
        session.initialize(&SMT_PAIR).unwrap();
        assert!(session.is_live());
        assert!(session.update(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_reinitialize_writes_same_values() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());

        session.initialize(&SMT_PAIR).unwrap();
        let first = driver.writes();
        driver.clear_writes();
        session.initialize(&SMT_PAIR).unwrap();
        assert_eq!(driver.writes(), first);
    }

    #[test]
    fn test_switching_configs_overwrites_program() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());
        let branch = crate::plugins::find(Family::Haswell, "Branch Prediction").unwrap();

        session.initialize(&SMT_PAIR).unwrap();
        session.initialize(branch).unwrap();
        assert_eq!(session.config().map(|c| c.name), Some("Branch Prediction"));
        assert_eq!(driver.get(1, core_msr::IA32_PERFEVTSEL0), 0x43_00C4);
        assert_eq!(driver.get(1, core_msr::IA32_FIXED_CTR_CTRL), 0x333);
    }

    #[test]
    fn test_energy_priming_failure_disables_counting() {
        let driver = MockDriver::new();
        // First pin to CPU 0 programs it, the second one primes RAPL
        let affinity = MockAffinity::new(&[0, 1]).failing_on_pin(0, 2);
        let mut session = Session::new(
            driver.clone(),
            Box::new(affinity),
            Arc::new(one_core_two_threads()),
            CounterWidths::default(),
        );

        assert!(matches!(
            session.initialize(&SMT_PAIR),
            Err(CoreflowError::AffinityError(_))
        ));
        assert!(!session.is_live());
        assert_eq!(driver.get(0, core_msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(driver.get(1, core_msr::IA32_PERF_GLOBAL_CTRL), 0);
    }

    #[test]
    fn test_pin_failure_abandons_tick() {
        let driver = MockDriver::new();
        let (mut session, switch) = session(&driver, one_core_two_threads());
        session.initialize(&SMT_PAIR).unwrap();

        *switch.lock() = Some(1);
        assert!(matches!(
            session.update(Duration::from_secs(1)),
            Err(CoreflowError::AffinityError(_))
        ));

        *switch.lock() = None;
        assert!(session.is_live());
        assert!(session.update(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());
        session.initialize(&SMT_PAIR).unwrap();
        driver.set(0, core_msr::IA32_FIXED_CTR0, 1_500);
        driver.set(0, core_msr::IA32_FIXED_CTR1, 1_000);

        let table = session.update(Duration::from_secs(1)).unwrap().render_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "SMT Pair (Haswell)");
        assert!(lines[1].trim_start().starts_with("Item"));
        assert!(lines[2].trim_start().starts_with("Thread 0"));
        assert!(lines[4].trim_start().starts_with("Overall"));
        assert_eq!(lines[1].len(), lines[4].len());
    }

    #[test]
    fn test_shutdown_disables_counting() {
        let driver = MockDriver::new();
        let (mut session, _) = session(&driver, one_core_two_threads());
        session.initialize(&SMT_PAIR).unwrap();

        session.shutdown().unwrap();
        assert!(!session.is_live());
        assert_eq!(driver.get(0, core_msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(driver.get(1, core_msr::IA32_PERF_GLOBAL_CTRL), 0);
    }
}
