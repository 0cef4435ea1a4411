// In-memory stand-ins for the MSR driver and the affinity primitive

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::common::affinity::{Affinity, ThreadMask};
use crate::common::msr::MsrDriver;
use crate::error::{CoreflowError, Result};

#[derive(Default)]
struct MockState {
    available: bool,
    registers: HashMap<(u32, u64), u64>,
    writes: Vec<(u32, u64, u64)>,
    failing: HashSet<u64>,
}

/// Register file keyed by `(cpu, address)`; unset registers read as 0
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        let driver = Self::default();
        driver.state.lock().available = true;
        Arc::new(driver)
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn set(&self, cpu: u32, addr: u64, value: u64) {
        self.state.lock().registers.insert((cpu, addr), value);
    }

    pub fn get(&self, cpu: u32, addr: u64) -> u64 {
        self.state
            .lock()
            .registers
            .get(&(cpu, addr))
            .copied()
            .unwrap_or(0)
    }

    /// Make every access to `addr` fail the way an unimplemented MSR does
    pub fn fail_address(&self, addr: u64) {
        self.state.lock().failing.insert(addr);
    }

    pub fn writes(&self) -> Vec<(u32, u64, u64)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl MsrDriver for MockDriver {
    fn probe(&self) -> Result<()> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(CoreflowError::DriverUnavailable("mock driver offline".to_string()))
        }
    }

    fn read_msr(&self, cpu: u32, addr: u64) -> Result<u64> {
        let state = self.state.lock();
        if !state.available {
            return Err(CoreflowError::DriverUnavailable("mock driver offline".to_string()));
        }
        if state.failing.contains(&addr) {
            return Err(CoreflowError::MsrError(format!(
                "Failed to read MSR 0x{addr:X} on CPU {cpu}: EIO"
            )));
        }
        Ok(state.registers.get(&(cpu, addr)).copied().unwrap_or(0))
    }

    fn write_msr(&self, cpu: u32, addr: u64, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(CoreflowError::DriverUnavailable("mock driver offline".to_string()));
        }
        if state.failing.contains(&addr) {
            return Err(CoreflowError::MsrError(format!(
                "Failed to write MSR 0x{addr:X} on CPU {cpu}: EIO"
            )));
        }
        state.writes.push((cpu, addr, value));
        state.registers.insert((cpu, addr), value);
        Ok(())
    }
}

/// Affinity that only records masks; pinning to the failing CPU errors
pub struct MockAffinity {
    current: Mutex<ThreadMask>,
    log: Arc<Mutex<Vec<ThreadMask>>>,
    failing: Arc<Mutex<Option<u32>>>,
    /// `(cpu, n)`: only the n-th pin to `cpu` fails, counting from 1
    failing_pin: Mutex<Option<(u32, usize)>>,
    pins: Mutex<HashMap<u32, usize>>,
}

impl MockAffinity {
    pub fn new(cpus: &[u32]) -> Self {
        Self {
            current: Mutex::new(cpus.iter().copied().collect()),
            log: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(None)),
            failing_pin: Mutex::new(None),
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing_on_pin(self, cpu: u32, n: usize) -> Self {
        *self.failing_pin.lock() = Some((cpu, n));
        self
    }

    pub fn failing_on(self, cpu: u32) -> Self {
        *self.failing.lock() = Some(cpu);
        self
    }

    /// Every mask passed to `set_affinity`, in order
    pub fn log(&self) -> Arc<Mutex<Vec<ThreadMask>>> {
        Arc::clone(&self.log)
    }

    /// Shared switch to start or stop failing after construction
    pub fn failure_switch(&self) -> Arc<Mutex<Option<u32>>> {
        Arc::clone(&self.failing)
    }
}

impl Affinity for MockAffinity {
    fn get_affinity(&self) -> Result<ThreadMask> {
        Ok(self.current.lock().clone())
    }

    fn set_affinity(&self, mask: &ThreadMask) -> Result<()> {
        if let Some(cpu) = *self.failing.lock() {
            if *mask == ThreadMask::single(cpu) {
                return Err(CoreflowError::AffinityError(format!(
                    "Failed to set affinity to CPU {cpu}"
                )));
            }
        }
        if let Some((cpu, n)) = *self.failing_pin.lock() {
            if *mask == ThreadMask::single(cpu) {
                let mut pins = self.pins.lock();
                let count = pins.entry(cpu).or_insert(0);
                *count += 1;
                if *count == n {
                    return Err(CoreflowError::AffinityError(format!(
                        "Failed to set affinity to CPU {cpu}"
                    )));
                }
            }
        }
        self.log.lock().push(mask.clone());
        *self.current.lock() = mask.clone();
        Ok(())
    }
}
