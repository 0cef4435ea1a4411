// Event-select specifications and per-config counter programs

use coreflow_raw::current_arch::core::{
    FixedCounterControl, FixedCtrCtrl, PerfEvtSel, CORE_FIXED_COUNTERS, CORE_PMU_COUNTERS,
};
use coreflow_raw::RegisterLayout;

/// Qualifier flags of an event select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFlags {
    pub user: bool,
    pub kernel: bool,
    pub edge: bool,
    pub pc: bool,
    pub interrupt: bool,
    pub any_thread: bool,
    pub invert: bool,
}

impl EventFlags {
    /// Count in both rings, no other qualifiers
    pub const ALL_RINGS: Self = Self {
        user: true,
        kernel: true,
        edge: false,
        pc: false,
        interrupt: false,
        any_thread: false,
        invert: false,
    };
}

/// One event to count in one general-purpose slot
///
/// Every field combination encodes; nonsensical ones are the caller's
/// problem, not a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSelectSpec {
    pub event: u8,
    pub umask: u8,
    pub flags: EventFlags,
    pub cmask: u8,
    pub name: &'static str,
    /// Known-odd semantics carried along with the data, not fixed up
    pub caveat: Option<&'static str>,
    /// Slot the hardware restricts this event to, if any
    pub required_slot: Option<u8>,
}

impl EventSelectSpec {
    pub const fn new(event: u8, umask: u8, name: &'static str) -> Self {
        Self {
            event,
            umask,
            flags: EventFlags::ALL_RINGS,
            cmask: 0,
            name,
            caveat: None,
            required_slot: None,
        }
    }

    pub const fn cmask(mut self, cmask: u8) -> Self {
        self.cmask = cmask;
        self
    }

    pub const fn any_thread(mut self) -> Self {
        self.flags.any_thread = true;
        self
    }

    pub const fn edge(mut self) -> Self {
        self.flags.edge = true;
        self
    }

    pub const fn invert(mut self) -> Self {
        self.flags.invert = true;
        self
    }

    pub const fn caveat(mut self, text: &'static str) -> Self {
        self.caveat = Some(text);
        self
    }

    pub const fn only_in_slot(mut self, slot: u8) -> Self {
        self.required_slot = Some(slot);
        self
    }

    /// Enabled event-select layout for this spec
    pub fn perf_evt_sel(&self) -> PerfEvtSel {
        PerfEvtSel {
            event_select: self.event,
            umask: self.umask,
            usr: self.flags.user,
            os: self.flags.kernel,
            edge: self.flags.edge,
            pc: self.flags.pc,
            int: self.flags.interrupt,
            any_thread: self.flags.any_thread,
            enable: true,
            invert: self.flags.invert,
            cmask: self.cmask,
        }
    }

    pub fn encode(&self) -> u64 {
        self.perf_evt_sel().to_msr_value()
    }
}

/// Everything one monitoring config programs on every logical thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterProgram {
    pub events: [Option<EventSelectSpec>; CORE_PMU_COUNTERS],
    /// AnyThread for fixed counters 0 (instructions), 1 (cycles), 2 (ref cycles)
    pub fixed_any_thread: [bool; CORE_FIXED_COUNTERS],
}

impl CounterProgram {
    pub const fn new(events: [Option<EventSelectSpec>; CORE_PMU_COUNTERS]) -> Self {
        Self {
            events,
            fixed_any_thread: [false; CORE_FIXED_COUNTERS],
        }
    }

    pub const fn four(
        pmc0: EventSelectSpec,
        pmc1: EventSelectSpec,
        pmc2: EventSelectSpec,
        pmc3: EventSelectSpec,
    ) -> Self {
        Self::new([Some(pmc0), Some(pmc1), Some(pmc2), Some(pmc3)])
    }

    pub const fn fixed_any_thread(mut self, instructions: bool, cycles: bool) -> Self {
        self.fixed_any_thread[0] = instructions;
        self.fixed_any_thread[1] = cycles;
        self
    }

    /// Event-select values for slots 0..3; unused slots are written as 0,
    /// which leaves the counter disabled
    pub fn event_select_values(&self) -> [u64; CORE_PMU_COUNTERS] {
        let mut values = [0u64; CORE_PMU_COUNTERS];
        for (value, spec) in values.iter_mut().zip(self.events.iter()) {
            if let Some(spec) = spec {
                *value = spec.encode();
            }
        }
        values
    }

    pub fn fixed_ctrl(&self) -> FixedCtrCtrl {
        let mut ctrl = FixedCtrCtrl::default();
        for (ctr, &any) in ctrl.counters.iter_mut().zip(self.fixed_any_thread.iter()) {
            *ctr = if any {
                FixedCounterControl::all_rings_any_thread()
            } else {
                FixedCounterControl::all_rings()
            };
        }
        ctrl
    }

    /// Check slot restrictions before anything is written
    pub fn validate(&self) -> Result<(), String> {
        for (slot, spec) in self.events.iter().enumerate() {
            if let Some(spec) = spec {
                if let Some(required) = spec.required_slot {
                    if required as usize != slot {
                        return Err(format!(
                            "{} only counts on PMC{}, programmed in PMC{}",
                            spec.name, required, slot
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn caveats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.events.iter().flatten().filter_map(|spec| spec.caveat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_encoding_matches_register_layout() {
        // Port 0 uops, user+kernel, enabled
        let spec = EventSelectSpec::new(0xA1, 0x01, "UOPS_EXECUTED_PORT.PORT_0");
        assert_eq!(spec.encode(), 0x0043_01A1);

        let rename = EventSelectSpec::new(0x0E, 0x01, "UOPS_ISSUED.ANY")
            .any_thread()
            .cmask(2);
        assert_eq!(rename.encode(), 0x0263_010E);
    }

    #[test]
    fn test_unused_slots_written_disabled() {
        let program = CounterProgram::new([
            Some(EventSelectSpec::new(0xC4, 0x00, "BR_INST_RETIRED.ALL_BRANCHES")),
            None,
            None,
            None,
        ]);
        assert_eq!(program.event_select_values(), [0x0043_00C4, 0, 0, 0]);
    }

    #[test]
    fn test_fixed_ctrl_any_thread() {
        let plain = CounterProgram::new([None; 4]);
        assert_eq!(plain.fixed_ctrl().to_msr_value(), 0x333);

        let core_scoped = plain.fixed_any_thread(true, true);
        assert_eq!(core_scoped.fixed_ctrl().to_msr_value(), 0x377);
    }

    #[test]
    fn test_slot_restriction() {
        let l1d = EventSelectSpec::new(0xA3, 0x0C, "CYCLE_ACTIVITY.STALLS_L1D_PENDING")
            .cmask(0x0C)
            .only_in_slot(2);
        let other = EventSelectSpec::new(0xA3, 0x04, "CYCLE_ACTIVITY.CYCLES_NO_EXECUTE");

        assert!(CounterProgram::four(other, other, l1d, other).validate().is_ok());
        let err = CounterProgram::four(l1d, other, other, other)
            .validate()
            .unwrap_err();
        assert!(err.contains("PMC2"));
    }

    #[test]
    fn test_caveats_are_preserved() {
        let odd = EventSelectSpec::new(0xA2, 0x02, "RESOURCE_STALLS.LB")
            .caveat("umask undocumented");
        let program = CounterProgram::new([Some(odd), None, None, None]);
        assert_eq!(program.caveats().collect::<Vec<_>>(), vec!["umask undocumented"]);
    }
}
