// Configs shared by every supported family

use crate::common::arch::Family;
use crate::counters::{CounterProgram, EventSelectSpec};
use crate::metrics::format::{self, ratio};
use crate::plugins::{core_cells, MetricContext, MonitoringConfig};

pub const fn branch_prediction(family: Family) -> MonitoringConfig {
    MonitoringConfig {
        name: "Branch Prediction",
        family,
        columns: &[
            "Item",
            "Active Cycles",
            "Instructions",
            "IPC",
            "BPU Accuracy",
            "Branch MPKI",
            "% Branches",
            "% Taken",
            "BAClears/Ki",
        ],
        help_text: "BAClears - frontend resteers when the decoder finds a branch the BTB missed",
        program: CounterProgram::four(
            EventSelectSpec::new(0xC4, 0x00, "BR_INST_RETIRED.ALL_BRANCHES"),
            EventSelectSpec::new(0xC5, 0x00, "BR_MISP_RETIRED.ALL_BRANCHES"),
            EventSelectSpec::new(0xE6, 0x1F, "BACLEARS.ANY"),
            EventSelectSpec::new(0xC4, 0x20, "BR_INST_RETIRED.NEAR_TAKEN"),
        ),
        fold_overrides: &[],
        formula: branch_prediction_row,
    }
}

fn branch_prediction_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let branches = ctx.pmc(0);
    let mispredicts = ctx.pmc(1);
    let mut cells = core_cells(ctx);
    cells.extend([
        format::percent(ratio(branches - mispredicts, branches)),
        format::fixed2(ctx.per_ki(mispredicts)),
        format::percent(ratio(branches, ctx.sample.instructions)),
        format::percent(ratio(ctx.pmc(3), branches)),
        format::fixed2(ctx.per_ki(ctx.pmc(2))),
    ]);
    cells
}

/// Decoded stream buffer against legacy decoder delivery
pub const fn op_cache(family: Family) -> MonitoringConfig {
    MonitoringConfig {
        name: "Op Cache Performance",
        family,
        columns: &[
            "Item",
            "Instructions",
            "IPC",
            "Op Cache Ops/C",
            "Op Cache Hitrate",
            "Decoder Ops/C",
            "Op Cache Ops",
            "Decoder Ops",
        ],
        help_text: "Ops/C columns are per cycle the source was delivering",
        program: CounterProgram::four(
            EventSelectSpec::new(0x79, 0x08, "IDQ.DSB_UOPS"),
            EventSelectSpec::new(0x79, 0x08, "IDQ.DSB_CYCLES").cmask(1),
            EventSelectSpec::new(0x79, 0x04, "IDQ.MITE_UOPS"),
            EventSelectSpec::new(0x79, 0x04, "IDQ.MITE_CYCLES").cmask(1),
        ),
        fold_overrides: &[],
        formula: op_cache_row,
    }
}

fn op_cache_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (dsb_uops, dsb_cycles) = (ctx.pmc(0), ctx.pmc(1));
    let (mite_uops, mite_cycles) = (ctx.pmc(2), ctx.pmc(3));
    vec![
        format::large_number(ctx.sample.instructions),
        format::fixed2(ctx.ipc()),
        format::fixed2(ratio(dsb_uops, dsb_cycles)),
        format::percent(ratio(dsb_uops, dsb_uops + mite_uops)),
        format::fixed2(ratio(mite_uops, mite_cycles)),
        format::large_number(dsb_uops),
        format::large_number(mite_uops),
    ]
}
