// Logical-thread topology, discovered once from sysfs

use std::collections::BTreeMap;

use crate::error::{CoreflowError, Result};

const SYSFS_CPU: &str = "/sys/devices/system/cpu";

/// An addressable execution context: the unit of pinning and counter access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalThread {
    /// Position in the topology, 0-based and dense
    pub index: usize,
    /// OS CPU number used for affinity and the MSR device path
    pub cpu: u32,
    pub core_id: u32,
    pub package_id: u32,
}

/// Immutable view of the machine's logical threads, sorted by OS CPU number
#[derive(Debug, Clone)]
pub struct Topology {
    threads: Vec<LogicalThread>,
    cores: Vec<Vec<usize>>,
    packages: Vec<(u32, usize)>,
}

impl Topology {
    /// Build from `(cpu, core_id, package_id)` triples
    pub fn from_cpus(cpus: &[(u32, u32, u32)]) -> Result<Self> {
        if cpus.is_empty() {
            return Err(CoreflowError::ConfigError(
                "topology has no logical threads".to_string(),
            ));
        }

        let mut sorted = cpus.to_vec();
        sorted.sort_unstable_by_key(|&(cpu, _, _)| cpu);
        sorted.dedup_by_key(|&mut (cpu, _, _)| cpu);

        let threads: Vec<LogicalThread> = sorted
            .into_iter()
            .enumerate()
            .map(|(index, (cpu, core_id, package_id))| LogicalThread {
                index,
                cpu,
                core_id,
                package_id,
            })
            .collect();

        // Siblings keyed by (package, core), ordered by their first thread
        let mut by_core: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
        let mut packages: BTreeMap<u32, usize> = BTreeMap::new();
        for thread in &threads {
            by_core
                .entry((thread.package_id, thread.core_id))
                .or_default()
                .push(thread.index);
            packages.entry(thread.package_id).or_insert(thread.index);
        }
        let mut cores: Vec<Vec<usize>> = by_core.into_values().collect();
        cores.sort_unstable_by_key(|siblings| siblings[0]);

        Ok(Self {
            threads,
            cores,
            packages: packages.into_iter().collect(),
        })
    }

    /// Synthetic topology: `packages` x `cores` x `smt` threads, numbered the
    /// way Linux enumerates SMT siblings (all first siblings, then all second)
    pub fn uniform(packages: u32, cores: u32, smt: u32) -> Result<Self> {
        let per_sibling = packages * cores;
        let mut cpus = Vec::new();
        for sibling in 0..smt {
            for package in 0..packages {
                for core in 0..cores {
                    let cpu = sibling * per_sibling + package * cores + core;
                    cpus.push((cpu, core, package));
                }
            }
        }
        Self::from_cpus(&cpus)
    }

    /// Read online CPUs and their core/package ids from sysfs
    pub fn discover() -> Result<Self> {
        let online = std::fs::read_to_string(format!("{SYSFS_CPU}/online"))
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                let n = std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(1);
                tracing::warn!("Failed to read online CPUs, assuming 0-{}", n - 1);
                (0..n).collect()
            });

        let cpus: Vec<(u32, u32, u32)> = online
            .into_iter()
            .map(|cpu| {
                let core_id = read_topology_id(cpu, "core_id").unwrap_or_else(|| {
                    tracing::warn!("No core_id for CPU {}, treating it as its own core", cpu);
                    cpu
                });
                let package_id = read_topology_id(cpu, "physical_package_id").unwrap_or(0);
                (cpu, core_id, package_id)
            })
            .collect();

        let topology = Self::from_cpus(&cpus)?;
        tracing::info!(
            "Discovered {} logical threads on {} cores, {} packages",
            topology.thread_count(),
            topology.core_count(),
            topology.packages.len()
        );
        Ok(topology)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn threads(&self) -> &[LogicalThread] {
        &self.threads
    }

    pub fn thread(&self, index: usize) -> Option<&LogicalThread> {
        self.threads.get(index)
    }

    /// Thread indices grouped by physical core; each group is sorted and
    /// groups are ordered by their lowest thread index
    pub fn cores(&self) -> &[Vec<usize>] {
        &self.cores
    }

    /// `(package_id, first thread index)` for every package
    pub fn packages(&self) -> &[(u32, usize)] {
        &self.packages
    }

    pub fn smt_enabled(&self) -> bool {
        self.cores.iter().any(|siblings| siblings.len() > 1)
    }
}

fn read_topology_id(cpu: u32, name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("{SYSFS_CPU}/cpu{cpu}/topology/{name}"))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Parse a CPU list like "0-3,8-11" into CPU numbers
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    if cpus.is_empty() {
        None
    } else {
        Some(cpus)
    }
}
