use prometheus::{Gauge, GaugeVec, IntCounter, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::topology::Topology;
use crate::error::Result;
use crate::metrics::CounterMetric;
use crate::orchestrator::UpdateResults;

metric_enum! {
    pub enum PowerMetric {
        PackagePower => "package_power_watts",
        CorePower => "pp0_power_watts",
    }
}

/// Prometheus view of the latest tick
///
/// Counter gauges carry a const `thread` label (`"overall"` for the
/// aggregate) plus the thread's `cpu` and `core`.
pub struct SampleExporter {
    registry: Arc<Registry>,
    thread_gauges: HashMap<CounterMetric, Vec<Gauge>>,
    overall_gauges: HashMap<CounterMetric, Gauge>,
    power_gauges: HashMap<PowerMetric, Gauge>,
    config_info: GaugeVec,
    ticks: IntCounter,
    failed_ticks: IntCounter,
}

impl SampleExporter {
    pub fn new(topology: &Topology) -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("coreflow".to_string()), None)?);

        let mut thread_gauges = HashMap::new();
        let mut overall_gauges = HashMap::new();
        for metric in CounterMetric::all() {
            let opts = Opts::new(
                metric.name(),
                format!("{} counted over the last interval", metric.name()),
            );

            let mut gauges = Vec::with_capacity(topology.thread_count());
            for thread in topology.threads() {
                let gauge = Gauge::with_opts(
                    opts.clone()
                        .const_label("thread", thread.index.to_string())
                        .const_label("cpu", thread.cpu.to_string())
                        .const_label("core", thread.core_id.to_string()),
                )?;
                registry.register(Box::new(gauge.clone()))?;
                gauges.push(gauge);
            }
            thread_gauges.insert(metric, gauges);

            let overall = Gauge::with_opts(
                opts.const_label("thread", "overall")
                    .const_label("cpu", "all")
                    .const_label("core", "all"),
            )?;
            registry.register(Box::new(overall.clone()))?;
            overall_gauges.insert(metric, overall);
        }

        let mut power_gauges = HashMap::new();
        for metric in PowerMetric::all() {
            let gauge = Gauge::with_opts(Opts::new(
                metric.name(),
                format!("Average {} over the last interval", metric.name()),
            ))?;
            registry.register(Box::new(gauge.clone()))?;
            power_gauges.insert(metric, gauge);
        }

        let config_info = GaugeVec::new(
            Opts::new("config_info", "Monitoring config currently programmed"),
            &["config", "family"],
        )?;
        registry.register(Box::new(config_info.clone()))?;

        let ticks = IntCounter::new("ticks_total", "Completed sampling ticks")?;
        registry.register(Box::new(ticks.clone()))?;
        let failed_ticks = IntCounter::new("failed_ticks_total", "Abandoned sampling ticks")?;
        registry.register(Box::new(failed_ticks.clone()))?;

        Ok(Self {
            registry,
            thread_gauges,
            overall_gauges,
            power_gauges,
            config_info,
            ticks,
            failed_ticks,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn publish(&self, results: &UpdateResults) {
        for metric in CounterMetric::all() {
            if let Some(gauges) = self.thread_gauges.get(&metric) {
                for (gauge, sample) in gauges.iter().zip(results.threads.iter()) {
                    gauge.set(sample.get(metric));
                }
            }
            if let Some(gauge) = self.overall_gauges.get(&metric) {
                gauge.set(results.aggregate.get(metric));
            }
        }

        // Unsupported planes export NaN rather than a misleading zero
        let power = [
            (PowerMetric::PackagePower, results.aggregate.package_power),
            (PowerMetric::CorePower, results.aggregate.pp0_power),
        ];
        for (metric, watts) in power {
            if let Some(gauge) = self.power_gauges.get(&metric) {
                gauge.set(watts.unwrap_or(f64::NAN));
            }
        }

        self.config_info.reset();
        self.config_info
            .with_label_values(&[results.config, results.family.name()])
            .set(1.0);
        self.ticks.inc();
    }

    pub fn record_failure(&self) {
        self.failed_ticks.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::arch::Family;
    use crate::metrics::NormalizedSample;
    use prometheus::{Encoder, TextEncoder};

    fn results() -> UpdateResults {
        let thread = NormalizedSample {
            instructions: 100.0,
            active_cycles: 50.0,
            ..Default::default()
        };
        UpdateResults {
            config: "Branch Prediction",
            family: Family::Haswell,
            columns: &["Item"],
            thread_rows: vec![vec!["Thread 0".to_string()], vec!["Thread 1".to_string()]],
            overall: vec!["Overall".to_string()],
            threads: vec![thread, thread],
            cores: vec![],
            aggregate: NormalizedSample {
                instructions: 200.0,
                active_cycles: 100.0,
                package_power: Some(12.5),
                ..Default::default()
            },
            counter_totals: vec![],
            elapsed_secs: 1.0,
        }
    }

    #[test]
    fn test_publish_sets_gauges() {
        let topology = Topology::uniform(1, 1, 2).unwrap();
        let exporter = SampleExporter::new(&topology).unwrap();
        exporter.publish(&results());
        exporter.record_failure();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&exporter.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains(r#"coreflow_instructions{core="0",cpu="1",thread="1"} 100"#));
        assert!(text.contains(r#"coreflow_instructions{core="all",cpu="all",thread="overall"} 200"#));
        assert!(text.contains("coreflow_package_power_watts 12.5"));
        assert!(text.contains("coreflow_pp0_power_watts NaN"));
        assert!(text.contains(r#"coreflow_config_info{config="Branch Prediction",family="Haswell"} 1"#));
        assert!(text.contains("coreflow_ticks_total 1"));
        assert!(text.contains("coreflow_failed_ticks_total 1"));
    }
}
