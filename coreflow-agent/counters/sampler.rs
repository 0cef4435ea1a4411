// Programs counters on every logical thread and harvests per-interval deltas

use std::sync::Arc;

use coreflow_raw::current_arch::core::{msr, GlobalCtrl};
use coreflow_raw::Register;

use crate::common::affinity::AffinityController;
use crate::common::msr::MsrDriver;
use crate::counters::events::CounterProgram;
use crate::counters::io::CounterIo;
use crate::counters::sample::{CounterWidths, RawSample};
use crate::error::{CoreflowError, Result};

pub struct Sampler {
    driver: Arc<dyn MsrDriver>,
    widths: CounterWidths,
    live: bool,
}

impl Sampler {
    pub fn new(driver: Arc<dyn MsrDriver>, widths: CounterWidths) -> Self {
        Self {
            driver,
            widths,
            live: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn widths(&self) -> CounterWidths {
        self.widths
    }

    /// Program `program` on every logical thread, in index order
    ///
    /// Per thread: global disable, fixed control, all four event selects,
    /// zero every counter, global enable. Repeating it with the same
    /// program writes the same values in the same order.
    pub fn program(
        &mut self,
        affinity: &mut AffinityController,
        program: &CounterProgram,
    ) -> Result<()> {
        self.live = false;
        program.validate().map_err(CoreflowError::UnsupportedEvent)?;

        let event_selects = program.event_select_values();
        let fixed_ctrl = Register::new(msr::IA32_FIXED_CTR_CTRL, program.fixed_ctrl());
        let global_on = Register::new(msr::IA32_PERF_GLOBAL_CTRL, GlobalCtrl::all_enabled());
        let global_off = Register::new(msr::IA32_PERF_GLOBAL_CTRL, GlobalCtrl::default());
        let driver = Arc::clone(&self.driver);

        affinity.for_each_thread(|thread| {
            let io = CounterIo::new(driver.as_ref(), thread);
            io.write_register(&global_off)?;
            io.write_register(&fixed_ctrl)?;
            for (slot, &value) in event_selects.iter().enumerate() {
                io.write_event_select(slot, value)?;
            }
            io.zero_all()?;
            io.write_register(&global_on)?;
            tracing::debug!("Programmed counters on CPU {}", thread.cpu);
            Ok(())
        })?;

        self.live = true;
        Ok(())
    }

    /// Read then zero every counter on every thread, returning the deltas
    ///
    /// Counters start each interval at zero, so a delta is the read value
    /// masked to the counter width. Any failure abandons the whole tick; a
    /// partial vector is never returned.
    pub fn harvest(&mut self, affinity: &mut AffinityController) -> Result<Vec<RawSample>> {
        if !self.live {
            return Err(CoreflowError::NotInitialized(
                "counters have not been programmed".to_string(),
            ));
        }

        let driver = Arc::clone(&self.driver);
        let widths = self.widths;
        let zeroed = RawSample::default();
        let mut samples = Vec::with_capacity(affinity.topology().thread_count());

        affinity.for_each_thread(|thread| {
            let io = CounterIo::new(driver.as_ref(), thread);
            let current = io.read_all()?;
            io.zero_all()?;
            samples.push(current.delta_since(&zeroed, widths));
            Ok(())
        })?;

        Ok(samples)
    }

    /// Best-effort global disable on every thread
    pub fn disable(&mut self, affinity: &mut AffinityController) -> Result<()> {
        self.live = false;
        let global_off = Register::new(msr::IA32_PERF_GLOBAL_CTRL, GlobalCtrl::default());
        let driver = Arc::clone(&self.driver);
        affinity.for_each_thread(|thread| {
            CounterIo::new(driver.as_ref(), thread).write_register(&global_off)
        })
    }
}
