// Folding per-thread samples into per-core and machine-wide values

use serde::Serialize;

use crate::common::topology::Topology;
use crate::counters::{CounterProgram, RawSample};
use crate::error::{CoreflowError, Result};

enum_with_data! {
    /// Counters sampled under every monitoring config
    pub enum CounterMetric: usize {
        RetiredInstructions => ("instructions", 0),
        ActiveCycles => ("active_cycles", 1),
        ReferenceCycles => ("reference_cycles", 2),
        Pmc0 => ("pmc0", 3),
        Pmc1 => ("pmc1", 4),
        Pmc2 => ("pmc2", 5),
        Pmc3 => ("pmc3", 6),
    }
    impl slot -> usize
}

const METRIC_COUNT: usize = 7;

impl CounterMetric {
    pub fn general(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(CounterMetric::Pmc0),
            1 => Some(CounterMetric::Pmc1),
            2 => Some(CounterMetric::Pmc2),
            3 => Some(CounterMetric::Pmc3),
            _ => None,
        }
    }
}

/// How a metric combines across logical threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fold {
    /// Each thread's count is its own
    #[default]
    Sum,
    /// Every sibling reports the whole core's count; keep one per core
    TakeFromThread0,
}

/// Per-metric fold choice for one monitoring config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregationPolicy {
    folds: [Fold; METRIC_COUNT],
}

impl AggregationPolicy {
    /// Counters programmed with AnyThread count for the whole core and
    /// fold by taking one sibling; everything else sums
    pub fn from_program(program: &CounterProgram) -> Self {
        let mut policy = Self::default();
        let fixed = [
            CounterMetric::RetiredInstructions,
            CounterMetric::ActiveCycles,
            CounterMetric::ReferenceCycles,
        ];
        for (metric, &any) in fixed.iter().zip(program.fixed_any_thread.iter()) {
            if any {
                policy.set(*metric, Fold::TakeFromThread0);
            }
        }
        for (slot, spec) in program.events.iter().enumerate() {
            if let (Some(spec), Some(metric)) = (spec, CounterMetric::general(slot)) {
                if spec.flags.any_thread {
                    policy.set(metric, Fold::TakeFromThread0);
                }
            }
        }
        policy
    }

    pub fn with(mut self, metric: CounterMetric, fold: Fold) -> Self {
        self.set(metric, fold);
        self
    }

    pub fn set(&mut self, metric: CounterMetric, fold: Fold) {
        self.folds[metric.slot()] = fold;
    }

    pub fn fold(&self, metric: CounterMetric) -> Fold {
        self.folds[metric.slot()]
    }
}

/// Counter deltas as floating point, plus power for aggregate rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NormalizedSample {
    pub instructions: f64,
    pub active_cycles: f64,
    pub reference_cycles: f64,
    pub pmc: [f64; 4],
    /// Watts; only meaningful on aggregate rows
    pub package_power: Option<f64>,
    pub pp0_power: Option<f64>,
}

impl NormalizedSample {
    pub fn from_raw(raw: &RawSample) -> Self {
        Self {
            instructions: raw.instructions() as f64,
            active_cycles: raw.active_cycles() as f64,
            reference_cycles: raw.reference_cycles() as f64,
            pmc: raw.general.map(|v| v as f64),
            package_power: None,
            pp0_power: None,
        }
    }

    pub fn get(&self, metric: CounterMetric) -> f64 {
        match metric {
            CounterMetric::RetiredInstructions => self.instructions,
            CounterMetric::ActiveCycles => self.active_cycles,
            CounterMetric::ReferenceCycles => self.reference_cycles,
            CounterMetric::Pmc0 => self.pmc[0],
            CounterMetric::Pmc1 => self.pmc[1],
            CounterMetric::Pmc2 => self.pmc[2],
            CounterMetric::Pmc3 => self.pmc[3],
        }
    }

    pub fn set(&mut self, metric: CounterMetric, value: f64) {
        match metric {
            CounterMetric::RetiredInstructions => self.instructions = value,
            CounterMetric::ActiveCycles => self.active_cycles = value,
            CounterMetric::ReferenceCycles => self.reference_cycles = value,
            CounterMetric::Pmc0 => self.pmc[0] = value,
            CounterMetric::Pmc1 => self.pmc[1] = value,
            CounterMetric::Pmc2 => self.pmc[2] = value,
            CounterMetric::Pmc3 => self.pmc[3] = value,
        }
    }
}

/// One tick's samples laid over the topology
pub struct Normalizer<'a> {
    topology: &'a Topology,
    threads: Vec<NormalizedSample>,
}

impl<'a> Normalizer<'a> {
    /// `raw[i]` belongs to logical thread `i`
    pub fn new(topology: &'a Topology, raw: &[RawSample]) -> Result<Self> {
        if raw.len() != topology.thread_count() {
            return Err(CoreflowError::ConfigError(format!(
                "{} samples for {} logical threads",
                raw.len(),
                topology.thread_count()
            )));
        }
        Ok(Self {
            topology,
            threads: raw.iter().map(NormalizedSample::from_raw).collect(),
        })
    }

    pub fn threads(&self) -> &[NormalizedSample] {
        &self.threads
    }

    pub fn thread(&self, index: usize) -> Option<&NormalizedSample> {
        self.threads.get(index)
    }

    pub fn sum_across_threads(&self, metric: CounterMetric) -> f64 {
        self.threads.iter().map(|s| s.get(metric)).sum()
    }

    /// Sum of the first sibling of every physical core
    ///
    /// Matches [`Self::sum_across_threads`] when SMT is off.
    pub fn take_from_thread0(&self, metric: CounterMetric) -> f64 {
        self.topology
            .cores()
            .iter()
            .map(|siblings| self.threads[siblings[0]].get(metric))
            .sum()
    }

    pub fn fold(&self, metric: CounterMetric, fold: Fold) -> f64 {
        match fold {
            Fold::Sum => self.sum_across_threads(metric),
            Fold::TakeFromThread0 => self.take_from_thread0(metric),
        }
    }

    /// Machine-wide sample, every metric folded by `policy`
    pub fn aggregate(&self, policy: &AggregationPolicy) -> NormalizedSample {
        let mut total = NormalizedSample::default();
        for metric in CounterMetric::all() {
            total.set(metric, self.fold(metric, policy.fold(metric)));
        }
        total
    }

    /// One sample per physical core, in [`Topology::cores`] order
    pub fn per_core(&self, policy: &AggregationPolicy) -> Vec<NormalizedSample> {
        self.topology
            .cores()
            .iter()
            .map(|siblings| {
                let mut core = NormalizedSample::default();
                for metric in CounterMetric::all() {
                    let value = match policy.fold(metric) {
                        Fold::Sum => siblings.iter().map(|&i| self.threads[i].get(metric)).sum(),
                        Fold::TakeFromThread0 => self.threads[siblings[0]].get(metric),
                    };
                    core.set(metric, value);
                }
                core
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::EventSelectSpec;

    fn raw(instructions: u64, cycles: u64, pmc0: u64) -> RawSample {
        RawSample {
            fixed: [instructions, cycles, cycles],
            general: [pmc0, 0, 0, 0],
        }
    }

    #[test]
    fn test_smt_pair_folds() {
        // One core, two siblings; cycles and pmc0 counted with AnyThread
        let topology = Topology::from_cpus(&[(0, 0, 0), (1, 0, 0)]).unwrap();
        let program = CounterProgram::new([
            Some(EventSelectSpec::new(0xA1, 0x01, "UOPS_DISPATCHED_PORT.PORT_0").any_thread()),
            None,
            None,
            None,
        ])
        .fixed_any_thread(false, true);
        let policy = AggregationPolicy::from_program(&program);
        assert_eq!(policy.fold(CounterMetric::RetiredInstructions), Fold::Sum);
        assert_eq!(policy.fold(CounterMetric::ActiveCycles), Fold::TakeFromThread0);
        assert_eq!(policy.fold(CounterMetric::Pmc0), Fold::TakeFromThread0);
        assert_eq!(policy.fold(CounterMetric::Pmc1), Fold::Sum);

        let samples = [raw(1_000_000, 500_000, 250_000), raw(1_000_000, 500_000, 250_000)];
        let normalizer = Normalizer::new(&topology, &samples).unwrap();
        let total = normalizer.aggregate(&policy);

        assert_eq!(total.instructions, 2_000_000.0);
        assert_eq!(total.active_cycles, 500_000.0);
        assert_eq!(total.pmc[0], 250_000.0);
        assert_eq!(total.instructions / total.active_cycles, 4.0);
    }

    #[test]
    fn test_sum_matches_manual_total() {
        let topology = Topology::uniform(2, 2, 2).unwrap();
        let samples: Vec<RawSample> = (0..8u64)
            .map(|i| raw(i * 1_000 + 7, i * 13, i * i))
            .collect();
        let normalizer = Normalizer::new(&topology, &samples).unwrap();

        for metric in CounterMetric::all() {
            let manual: f64 = normalizer.threads().iter().map(|s| s.get(metric)).sum();
            assert_eq!(normalizer.sum_across_threads(metric), manual);
        }
        assert_eq!(
            normalizer.sum_across_threads(CounterMetric::Pmc0),
            (0..8u64).map(|i| (i * i) as f64).sum::<f64>()
        );
    }

    #[test]
    fn test_take_first_without_smt_equals_sum() {
        let topology = Topology::uniform(1, 4, 1).unwrap();
        assert!(!topology.smt_enabled());
        let samples: Vec<RawSample> = (1..=4u64).map(|i| raw(i * 10, i * 3, i)).collect();
        let normalizer = Normalizer::new(&topology, &samples).unwrap();

        for metric in CounterMetric::all() {
            assert_eq!(
                normalizer.take_from_thread0(metric),
                normalizer.sum_across_threads(metric)
            );
        }
    }

    #[test]
    fn test_take_first_uses_first_sibling_per_core() {
        // cpus 0,1 are first siblings of cores 0,1; cpus 2,3 their partners
        let topology = Topology::uniform(1, 2, 2).unwrap();
        let samples = [raw(10, 0, 0), raw(20, 0, 0), raw(99, 0, 0), raw(99, 0, 0)];
        let normalizer = Normalizer::new(&topology, &samples).unwrap();

        assert_eq!(
            normalizer.take_from_thread0(CounterMetric::RetiredInstructions),
            30.0
        );
        assert_eq!(
            normalizer.sum_across_threads(CounterMetric::RetiredInstructions),
            228.0
        );
    }

    #[test]
    fn test_per_core() {
        let topology = Topology::uniform(1, 2, 2).unwrap();
        let samples = [raw(1, 5, 7), raw(2, 6, 8), raw(3, 5, 7), raw(4, 6, 8)];
        let normalizer = Normalizer::new(&topology, &samples).unwrap();
        let policy = AggregationPolicy::default()
            .with(CounterMetric::ActiveCycles, Fold::TakeFromThread0)
            .with(CounterMetric::Pmc0, Fold::TakeFromThread0);

        let cores = normalizer.per_core(&policy);
        assert_eq!(cores.len(), 2);
        assert_eq!(cores[0].instructions, 4.0);
        assert_eq!(cores[0].active_cycles, 5.0);
        assert_eq!(cores[1].instructions, 6.0);
        assert_eq!(cores[1].pmc[0], 8.0);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let topology = Topology::uniform(1, 2, 1).unwrap();
        assert!(Normalizer::new(&topology, &[RawSample::default()]).is_err());
    }
}
