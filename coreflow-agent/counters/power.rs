// Package and core-plane energy from the RAPL energy-status registers

use std::sync::Arc;
use std::time::Duration;

use coreflow_raw::current_arch::rapl::{
    energy_status_count, msr, RaplPowerUnit, ENERGY_STATUS_WIDTH,
};
use coreflow_raw::RegisterLayout;

use crate::common::affinity::AffinityController;
use crate::common::msr::MsrDriver;
use crate::counters::sample::counter_delta;
use crate::error::Result;

/// Energy consumed over one interval, or the reason there is none
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyReading {
    Joules(f64),
    /// The register is absent or unreadable on this chip
    Unsupported,
}

impl EnergyReading {
    pub fn joules(&self) -> Option<f64> {
        match *self {
            EnergyReading::Joules(j) => Some(j),
            EnergyReading::Unsupported => None,
        }
    }

    /// Average power over `elapsed`; `None` when unsupported or the
    /// interval is empty
    pub fn watts(&self, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        match self.joules() {
            Some(j) if secs > 0.0 => Some(j / secs),
            _ => None,
        }
    }
}

/// Power planes exposed by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPlane {
    Package,
    /// PP0, the cores of a package
    Core,
}

impl PowerPlane {
    pub fn address(&self) -> u64 {
        match self {
            PowerPlane::Package => msr::MSR_PKG_ENERGY_STATUS,
            PowerPlane::Core => msr::MSR_PP0_ENERGY_STATUS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PowerPlane::Package => "package",
            PowerPlane::Core => "core",
        }
    }

    fn index(&self) -> usize {
        match self {
            PowerPlane::Package => 0,
            PowerPlane::Core => 1,
        }
    }
}

struct PackageEnergy {
    package_id: u32,
    /// Logical thread whose registers represent the package
    thread_index: usize,
    joules_per_unit: f64,
    /// Last raw count per plane; `None` marks the plane unsupported
    last: [Option<u32>; 2],
}

/// Energy-status reader for every package in the topology
///
/// The registers are read-only and wrap at 32 bits, so a baseline is kept
/// per package and plane instead of zeroing.
pub struct PowerReader {
    driver: Arc<dyn MsrDriver>,
    packages: Vec<PackageEnergy>,
}

impl PowerReader {
    pub fn new(driver: Arc<dyn MsrDriver>) -> Self {
        Self {
            driver,
            packages: Vec::new(),
        }
    }

    /// Read the energy unit and prime both baselines on every package
    ///
    /// A package whose unit register cannot be read reports every plane as
    /// unsupported. Only a pinning failure is returned as an error.
    pub fn start(&mut self, affinity: &mut AffinityController) -> Result<()> {
        let packages: Vec<(u32, usize)> = affinity.topology().packages().to_vec();
        let driver = Arc::clone(&self.driver);
        self.packages.clear();

        for (package_id, thread_index) in packages {
            let state = affinity.with_thread(thread_index, |thread| {
                let mut state = PackageEnergy {
                    package_id,
                    thread_index,
                    joules_per_unit: 0.0,
                    last: [None, None],
                };

                let unit = match driver.read_msr(thread.cpu, msr::MSR_RAPL_POWER_UNIT) {
                    Ok(value) => RaplPowerUnit::from_msr_value(value),
                    Err(e) => {
                        tracing::warn!("RAPL unavailable on package {}: {}", package_id, e);
                        return Ok(state);
                    }
                };
                state.joules_per_unit = unit.joules_per_unit();

                for plane in [PowerPlane::Package, PowerPlane::Core] {
                    match driver.read_msr(thread.cpu, plane.address()) {
                        Ok(value) => state.last[plane.index()] = Some(energy_status_count(value)),
                        Err(e) => tracing::warn!(
                            "No {} energy counter on package {}: {}",
                            plane.name(),
                            package_id,
                            e
                        ),
                    }
                }
                Ok(state)
            })?;
            self.packages.push(state);
        }

        tracing::info!(
            "Energy unit {:?} J on {} package(s)",
            self.packages.first().map(|p| p.joules_per_unit),
            self.packages.len()
        );
        Ok(())
    }

    pub fn read_package_energy(
        &mut self,
        affinity: &mut AffinityController,
    ) -> Result<EnergyReading> {
        self.read_plane(affinity, PowerPlane::Package)
    }

    pub fn read_core_plane_energy(
        &mut self,
        affinity: &mut AffinityController,
    ) -> Result<EnergyReading> {
        self.read_plane(affinity, PowerPlane::Core)
    }

    /// Energy since the previous read of `plane`, summed over packages
    pub fn read_plane(
        &mut self,
        affinity: &mut AffinityController,
        plane: PowerPlane,
    ) -> Result<EnergyReading> {
        let driver = Arc::clone(&self.driver);
        let mut total = 0.0;
        let mut supported = false;

        for package in self.packages.iter_mut() {
            let Some(last) = package.last[plane.index()] else {
                continue;
            };

            let read = affinity.with_thread(package.thread_index, |thread| {
                Ok(driver.read_msr(thread.cpu, plane.address()))
            })?;

            match read {
                Ok(value) => {
                    let count = energy_status_count(value);
                    let delta = counter_delta(last as u64, count as u64, ENERGY_STATUS_WIDTH);
                    package.last[plane.index()] = Some(count);
                    total += delta as f64 * package.joules_per_unit;
                    supported = true;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to read {} energy on package {}: {}",
                        plane.name(),
                        package.package_id,
                        e
                    );
                }
            }
        }

        Ok(if supported {
            EnergyReading::Joules(total)
        } else {
            EnergyReading::Unsupported
        })
    }
}
