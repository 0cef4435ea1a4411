// Raw counter reads and writes on the currently pinned logical thread

use coreflow_raw::current_arch::core::{msr, CORE_FIXED_COUNTERS, CORE_PMU_COUNTERS};
use coreflow_raw::{Register, RegisterLayout};

use crate::common::msr::MsrDriver;
use crate::common::topology::LogicalThread;
use crate::counters::sample::RawSample;
use crate::error::{CoreflowError, Result};

/// A counter addressable on every logical thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSlot {
    General(usize),
    Fixed(usize),
}

impl CounterSlot {
    pub fn address(&self) -> Result<u64> {
        match *self {
            CounterSlot::General(i) if i < CORE_PMU_COUNTERS => Ok(msr::PMC[i]),
            CounterSlot::Fixed(i) if i < CORE_FIXED_COUNTERS => Ok(msr::FIXED_CTR[i]),
            other => Err(CoreflowError::UnsupportedEvent(format!(
                "Counter {other:?} does not exist"
            ))),
        }
    }
}

/// Register I/O scoped to one logical thread
///
/// Only valid while the calling context is pinned to `thread`; the
/// borrow ties it to the closure handed out by
/// [`AffinityController::with_thread`](crate::common::AffinityController::with_thread).
pub struct CounterIo<'a> {
    driver: &'a dyn MsrDriver,
    thread: &'a LogicalThread,
}

impl<'a> CounterIo<'a> {
    pub fn new(driver: &'a dyn MsrDriver, thread: &'a LogicalThread) -> Self {
        Self { driver, thread }
    }

    pub fn thread(&self) -> &LogicalThread {
        self.thread
    }

    pub fn write_event_select(&self, slot: usize, value: u64) -> Result<()> {
        let addr = msr::PERFEVTSEL.get(slot).copied().ok_or_else(|| {
            CoreflowError::UnsupportedEvent(format!("Event select {slot} does not exist"))
        })?;
        self.driver.write_msr(self.thread.cpu, addr, value)
    }

    pub fn write_counter(&self, slot: CounterSlot, value: u64) -> Result<()> {
        self.driver.write_msr(self.thread.cpu, slot.address()?, value)
    }

    pub fn read_counter(&self, slot: CounterSlot) -> Result<u64> {
        self.driver.read_msr(self.thread.cpu, slot.address()?)
    }

    pub fn write_register<T: RegisterLayout>(&self, register: &Register<T>) -> Result<()> {
        register
            .validate()
            .map_err(|e| CoreflowError::ConfigError(e.to_string()))?;
        self.driver
            .write_msr(self.thread.cpu, register.address, register.to_msr_value())
    }

    pub fn read_register<T: RegisterLayout>(&self, address: u64) -> Result<Register<T>> {
        let value = self.driver.read_msr(self.thread.cpu, address)?;
        Ok(Register::new(address, T::from_msr_value(value)))
    }

    /// Read all fixed then all general-purpose counters
    pub fn read_all(&self) -> Result<RawSample> {
        let mut sample = RawSample::default();
        for (i, value) in sample.fixed.iter_mut().enumerate() {
            *value = self.read_counter(CounterSlot::Fixed(i))?;
        }
        for (i, value) in sample.general.iter_mut().enumerate() {
            *value = self.read_counter(CounterSlot::General(i))?;
        }
        Ok(sample)
    }

    pub fn zero_all(&self) -> Result<()> {
        for i in 0..CORE_FIXED_COUNTERS {
            self.write_counter(CounterSlot::Fixed(i), 0)?;
        }
        for i in 0..CORE_PMU_COUNTERS {
            self.write_counter(CounterSlot::General(i), 0)?;
        }
        Ok(())
    }
}
