// Sandy Bridge configs

use crate::common::arch::Family;
use crate::counters::{CounterProgram, EventSelectSpec};
use crate::metrics::format;
use crate::plugins::common::{branch_prediction, op_cache};
use crate::plugins::{MetricContext, MonitoringConfig};

pub static CONFIGS: &[MonitoringConfig] = &[
    branch_prediction(Family::SandyBridge),
    op_cache(Family::SandyBridge),
    ALU_PORTS,
];

/// Counted per core: every counter, fixed ones included, sets AnyThread
const ALU_PORTS: MonitoringConfig = MonitoringConfig {
    name: "Per-Core ALU Port Utilization",
    family: Family::SandyBridge,
    columns: &["Item", "Core Instructions", "Core IPC", "Port 0", "Port 1", "Port 5"],
    help_text: "Counts are for the whole physical core; SMT siblings report the same values",
    program: CounterProgram::new([
        Some(EventSelectSpec::new(0xA1, 0x01, "UOPS_DISPATCHED_PORT.PORT_0").any_thread()),
        Some(EventSelectSpec::new(0xA1, 0x02, "UOPS_DISPATCHED_PORT.PORT_1").any_thread()),
        Some(EventSelectSpec::new(0xA1, 0x80, "UOPS_DISPATCHED_PORT.PORT_5").any_thread()),
        None,
    ])
    .fixed_any_thread(true, true),
    fold_overrides: &[],
    formula: alu_ports_row,
};

fn alu_ports_row(ctx: &MetricContext<'_>) -> Vec<String> {
    vec![
        format::large_number(ctx.sample.instructions),
        format::fixed2(ctx.ipc()),
        format::percent(ctx.of_cycles(ctx.pmc(0))),
        format::percent(ctx.of_cycles(ctx.pmc(1))),
        format::percent(ctx.of_cycles(ctx.pmc(2))),
    ]
}
