// Haswell configs

use crate::common::arch::Family;
use crate::counters::{CounterProgram, EventSelectSpec};
use crate::metrics::format::{self, ratio};
use crate::plugins::common::{branch_prediction, op_cache};
use crate::plugins::{
    core_cells, optional_large, package_power_cells, MetricContext, MonitoringConfig,
};

pub static CONFIGS: &[MonitoringConfig] = &[
    branch_prediction(Family::Haswell),
    op_cache(Family::Haswell),
    ARCHITECTURAL,
    ALU_PORTS,
    LS_PORTS,
    LOAD_DTLB,
    MOVE_ELIMINATION,
    DISPATCH_STALLS,
    LOAD_DATA_SOURCES,
    L2_CACHE,
    RENAME,
    INSTRUCTION_FETCH,
    MEMORY_BOUND,
    RETIRE_SLOTS,
    OFFCORE_BURST,
    OFFCORE_REQUESTS,
];

/// Shorthand for the common `[core cells] + [extra]` row shape
fn with_core(ctx: &MetricContext<'_>, extra: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut cells = core_cells(ctx);
    cells.extend(extra);
    cells
}

/// Core cells, then package power cells, then `extra`
fn with_core_and_power(
    ctx: &MetricContext<'_>,
    extra: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let mut cells = core_cells(ctx);
    cells.extend(package_power_cells(ctx));
    cells.extend(extra);
    cells
}

fn pct_of_cycles(ctx: &MetricContext<'_>, count: f64) -> String {
    format::percent(ctx.of_cycles(count))
}

const ARCHITECTURAL: MonitoringConfig = MonitoringConfig {
    name: "Architectural Counters",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Ref Cycles",
        "Clock",
        "BPU Accuracy",
        "Branch MPKI",
        "LLC Hitrate",
        "LLC MPKI",
    ],
    help_text: "Clock is active cycles over reference cycles times the nominal frequency",
    program: CounterProgram::four(
        EventSelectSpec::new(0xC4, 0x00, "BR_INST_RETIRED.ALL_BRANCHES"),
        EventSelectSpec::new(0xC5, 0x00, "BR_MISP_RETIRED.ALL_BRANCHES"),
        EventSelectSpec::new(0x2E, 0x4F, "LONGEST_LAT_CACHE.REFERENCE"),
        EventSelectSpec::new(0x2E, 0x41, "LONGEST_LAT_CACHE.MISS"),
    ),
    fold_overrides: &[],
    formula: architectural_row,
};

fn architectural_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let s = ctx.sample;
    let clock = ratio(s.active_cycles, s.reference_cycles)
        .zip(ctx.base_frequency_hz)
        .map(|(r, base)| r * base);
    with_core(
        ctx,
        [
            format::large_number(s.reference_cycles),
            format::ghz(clock),
            format::percent(ratio(ctx.pmc(0) - ctx.pmc(1), ctx.pmc(0))),
            format::fixed2(ctx.per_ki(ctx.pmc(1))),
            format::percent(ratio(ctx.pmc(2) - ctx.pmc(3), ctx.pmc(2))),
            format::fixed2(ctx.per_ki(ctx.pmc(3))),
        ],
    )
}

/// AnyThread is left off: it counts per core on some Haswell parts and per
/// thread on others
const ALU_PORTS: MonitoringConfig = MonitoringConfig {
    name: "ALU Port Util/Pwr",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Pkg Pwr",
        "PP0 Pwr",
        "Instr/Watt",
        "Cores Instr/Watt",
        "Port 0",
        "Port 1",
        "Port 5",
        "Port 6",
    ],
    help_text: "Port 0 - ALU, FMUL/FMA, predicted not-taken branches\n\
                Port 1 - ALU, IMUL, FMUL/FADD/FMA\n\
                Port 5 - ALU, integer vector, crypto\n\
                Port 6 - ALU, predicted taken branches",
    program: CounterProgram::four(
        EventSelectSpec::new(0xA1, 0x01, "UOPS_EXECUTED_PORT.PORT_0")
            .caveat("AnyThread on port counters is unreliable across Haswell parts"),
        EventSelectSpec::new(0xA1, 0x02, "UOPS_EXECUTED_PORT.PORT_1"),
        EventSelectSpec::new(0xA1, 0x20, "UOPS_EXECUTED_PORT.PORT_5"),
        EventSelectSpec::new(0xA1, 0x40, "UOPS_EXECUTED_PORT.PORT_6"),
    ),
    fold_overrides: &[],
    formula: alu_ports_row,
};

fn alu_ports_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let s = ctx.sample;
    with_core(
        ctx,
        [
            format::watts(s.package_power),
            format::watts(s.pp0_power),
            optional_large(ctx.instructions_per_joule(s.package_power)),
            optional_large(ctx.instructions_per_joule(s.pp0_power)),
            pct_of_cycles(ctx, ctx.pmc(0)),
            pct_of_cycles(ctx, ctx.pmc(1)),
            pct_of_cycles(ctx, ctx.pmc(2)),
            pct_of_cycles(ctx, ctx.pmc(3)),
        ],
    )
}

const LS_PORTS: MonitoringConfig = MonitoringConfig {
    name: "AGU/LS Port Utilization",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "P2 AGU",
        "P3 AGU",
        "P4 StoreData",
        "P7 StoreAGU",
    ],
    help_text: "Port 2/3 - Load/Store address generation\n\
                Port 4 - Store Data. Each store sends an op to port 4, and one to port 2 or 3 or 7\n\
                Port 7 - Store address generation. Only handles simple address calculations (no index reg)",
    program: CounterProgram::four(
        EventSelectSpec::new(0xA1, 0x04, "UOPS_EXECUTED_PORT.PORT_2"),
        EventSelectSpec::new(0xA1, 0x08, "UOPS_EXECUTED_PORT.PORT_3"),
        EventSelectSpec::new(0xA1, 0x10, "UOPS_EXECUTED_PORT.PORT_4"),
        EventSelectSpec::new(0xA1, 0x80, "UOPS_EXECUTED_PORT.PORT_7"),
    ),
    fold_overrides: &[],
    formula: four_port_row,
};

fn four_port_row(ctx: &MetricContext<'_>) -> Vec<String> {
    with_core(ctx, (0..4).map(|slot| pct_of_cycles(ctx, ctx.pmc(slot))))
}

const LOAD_DTLB: MonitoringConfig = MonitoringConfig {
    name: "DTLB (loads)",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "DTLB Miss STLB Hit",
        "DTLB Miss, Page Walk",
        "Page Walk Completed",
        "DTLB MPKI",
        "STLB Hitrate",
        "Page Walk Duration",
        "Page Walk Cycles",
        "% Walks Completed",
    ],
    help_text: "",
    program: CounterProgram::four(
        EventSelectSpec::new(0x08, 0x10, "DTLB_LOAD_MISSES.WALK_DURATION"),
        EventSelectSpec::new(0x08, 0x60, "DTLB_LOAD_MISSES.STLB_HIT"),
        EventSelectSpec::new(0x08, 0x01, "DTLB_LOAD_MISSES.MISS_CAUSES_A_WALK"),
        EventSelectSpec::new(0x08, 0x0E, "DTLB_LOAD_MISSES.WALK_COMPLETED"),
    ),
    fold_overrides: &[],
    formula: load_dtlb_row,
};

fn load_dtlb_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (duration, stlb_hit, walks, completed) = (ctx.pmc(0), ctx.pmc(1), ctx.pmc(2), ctx.pmc(3));
    with_core(
        ctx,
        [
            format::large_number(stlb_hit),
            format::large_number(walks),
            format::large_number(completed),
            format::fixed2(ctx.per_ki(stlb_hit + walks)),
            format::percent(ratio(stlb_hit, stlb_hit + walks)),
            ratio(duration, walks)
                .map(|clks| format!("{clks:.2} clks"))
                .unwrap_or_else(|| format::NOT_AVAILABLE.to_string()),
            pct_of_cycles(ctx, duration),
            format::percent(ratio(completed, walks)),
        ],
    )
}

const MOVE_ELIMINATION: MonitoringConfig = MonitoringConfig {
    name: "Move Elimination",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "% movs eliminated",
        "% int movs elim",
        "% simd movs elim",
        "eliminated int movs",
        "int elim candidates",
        "eliminated simd movs",
        "simd elim candidates",
    ],
    help_text: "Eliminated movs have zero latency and don't use an execution port, \
                but still use up frontend/renamer bandwidth and backend tracking resources",
    program: CounterProgram::four(
        EventSelectSpec::new(0x58, 0x01, "MOVE_ELIMINATION.INT_ELIMINATED"),
        EventSelectSpec::new(0x58, 0x02, "MOVE_ELIMINATION.SIMD_ELIMINATED"),
        EventSelectSpec::new(0x58, 0x04, "MOVE_ELIMINATION.INT_NOT_ELIMINATED"),
        EventSelectSpec::new(0x58, 0x08, "MOVE_ELIMINATION.SIMD_NOT_ELIMINATED"),
    ),
    fold_overrides: &[],
    formula: move_elimination_row,
};

fn move_elimination_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (int_elim, simd_elim) = (ctx.pmc(0), ctx.pmc(1));
    let (int_kept, simd_kept) = (ctx.pmc(2), ctx.pmc(3));
    with_core(
        ctx,
        [
            format::percent(ratio(
                int_elim + simd_elim,
                int_elim + simd_elim + int_kept + simd_kept,
            )),
            format::percent(ratio(int_elim, int_elim + int_kept)),
            format::percent(ratio(simd_elim, simd_elim + simd_kept)),
            format::large_number(int_elim),
            format::large_number(int_elim + int_kept),
            format::large_number(simd_elim),
            format::large_number(simd_elim + simd_kept),
        ],
    )
}

const DISPATCH_STALLS: MonitoringConfig = MonitoringConfig {
    name: "Dispatch Stalls",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "(LDQ Full?)",
        "STQ Full",
        "RS Full",
        "ROB Full",
    ],
    help_text: "",
    program: CounterProgram::four(
        EventSelectSpec::new(0xA2, 0x02, "RESOURCE_STALLS.LB")
            .caveat("Load queue full umask is undocumented in Haswell"),
        EventSelectSpec::new(0xA2, 0x08, "RESOURCE_STALLS.SB"),
        EventSelectSpec::new(0xA2, 0x04, "RESOURCE_STALLS.RS"),
        EventSelectSpec::new(0xA2, 0x10, "RESOURCE_STALLS.ROB"),
    ),
    fold_overrides: &[],
    formula: four_port_row,
};

const LOAD_DATA_SOURCES: MonitoringConfig = MonitoringConfig {
    name: "Load Data Sources",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Ret. Loads",
        "L1/LFB %",
        "L1 MPKI",
        "L2 %",
        "L2 MPKI",
        "L3 %",
        "L3 MPKI",
        "DRAM %",
    ],
    help_text: "",
    program: CounterProgram::four(
        EventSelectSpec::new(0xD0, 0x82, "MEM_UOPS_RETIRED.ALL_LOADS"),
        EventSelectSpec::new(0xD1, 0x08, "MEM_LOAD_UOPS_RETIRED.L1_MISS"),
        EventSelectSpec::new(0xD1, 0x10, "MEM_LOAD_UOPS_RETIRED.L2_MISS"),
        EventSelectSpec::new(0xD1, 0x20, "MEM_LOAD_UOPS_RETIRED.L3_MISS"),
    ),
    fold_overrides: &[],
    formula: load_data_sources_row,
};

fn load_data_sources_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (loads, l1_miss, l2_miss, l3_miss) = (ctx.pmc(0), ctx.pmc(1), ctx.pmc(2), ctx.pmc(3));
    with_core(
        ctx,
        [
            format::large_number(loads),
            format::percent(ratio(loads - l1_miss, loads)),
            format::fixed2(ctx.per_ki(l1_miss)),
            format::percent(ratio(l1_miss - l2_miss, loads)),
            format::fixed2(ctx.per_ki(l2_miss)),
            format::percent(ratio(l2_miss - l3_miss, loads)),
            format::fixed2(ctx.per_ki(l3_miss)),
            format::percent(ratio(l3_miss, loads)),
        ],
    )
}

const L2_CACHE: MonitoringConfig = MonitoringConfig {
    name: "L2 Cache",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Pkg Pwr",
        "Instr/Watt",
        "L2 Hitrate",
        "L2 Hit BW",
        "L2 Fill BW",
        "L2 Writeback BW",
    ],
    help_text: "Bandwidth columns assume 64B lines",
    program: CounterProgram::four(
        EventSelectSpec::new(0x24, 0xFF, "L2_RQSTS.REFERENCES"),
        EventSelectSpec::new(0x24, 0x3F, "L2_RQSTS.MISS"),
        EventSelectSpec::new(0xF1, 0x07, "L2_LINES_IN.ALL"),
        EventSelectSpec::new(0xF2, 0x06, "L2_LINES_OUT.DEMAND_DIRTY"),
    ),
    fold_overrides: &[],
    formula: l2_cache_row,
};

fn l2_cache_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (refs, misses) = (ctx.pmc(0), ctx.pmc(1));
    with_core_and_power(
        ctx,
        [
            format::percent(ratio(refs - misses, refs)),
            format::with_unit(ctx.per_second((refs - misses) * 64.0), "B/s"),
            format::with_unit(ctx.per_second(ctx.pmc(2) * 64.0), "B/s"),
            format::with_unit(ctx.per_second(ctx.pmc(3) * 64.0), "B/s"),
        ],
    )
}

/// Issue-width histogram over the whole core
const RENAME: MonitoringConfig = MonitoringConfig {
    name: "Rename",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "uops issued",
        "uops issued/c",
        "1 uop",
        "2 uops",
        "3 uops",
        "4 uops",
        "issue active",
    ],
    help_text: "Issue counts and active cycles are for both threads of a core",
    program: CounterProgram::four(
        EventSelectSpec::new(0x0E, 0x01, "UOPS_ISSUED.ANY:c1").any_thread().cmask(1),
        EventSelectSpec::new(0x0E, 0x01, "UOPS_ISSUED.ANY:c2").any_thread().cmask(2),
        EventSelectSpec::new(0x0E, 0x01, "UOPS_ISSUED.ANY:c3").any_thread().cmask(3),
        EventSelectSpec::new(0x0E, 0x01, "UOPS_ISSUED.ANY:c4").any_thread().cmask(4),
    )
    // Core cycles, so the per-core issue counts divide by a per-core clock
    .fixed_any_thread(false, true),
    fold_overrides: &[],
    formula: rename_row,
};

/// Cycles with exactly 1..4 slots used, from cmask 1..4 threshold counts
fn slot_histogram(ctx: &MetricContext<'_>) -> ([f64; 4], f64) {
    let exact = [
        ctx.pmc(0) - ctx.pmc(1),
        ctx.pmc(1) - ctx.pmc(2),
        ctx.pmc(2) - ctx.pmc(3),
        ctx.pmc(3),
    ];
    let used = exact
        .iter()
        .enumerate()
        .map(|(i, cycles)| (i + 1) as f64 * cycles)
        .sum();
    (exact, used)
}

fn rename_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (exact, issued) = slot_histogram(ctx);
    let mut extra = vec![
        format::large_number(issued),
        format::fixed2(ctx.of_cycles(issued)),
    ];
    extra.extend(exact.iter().map(|&cycles| pct_of_cycles(ctx, cycles)));
    extra.push(pct_of_cycles(ctx, ctx.pmc(0)));
    with_core(ctx, extra)
}

const INSTRUCTION_FETCH: MonitoringConfig = MonitoringConfig {
    name: "Instruction Fetch",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "PkgPower",
        "Instr/Watt",
        "IC Hitrate",
        "IC MPKI",
        "IC Hits",
        "IFetch Stall",
        "IQ Full Stall",
    ],
    help_text: "",
    program: CounterProgram::four(
        EventSelectSpec::new(0x80, 0x01, "ICACHE.HIT"),
        EventSelectSpec::new(0x80, 0x02, "ICACHE.MISSES"),
        EventSelectSpec::new(0x80, 0x04, "ICACHE.IFETCH_STALL"),
        EventSelectSpec::new(0x87, 0x04, "ILD_STALL.IQ_FULL"),
    ),
    fold_overrides: &[],
    formula: instruction_fetch_row,
};

fn instruction_fetch_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (hits, misses) = (ctx.pmc(0), ctx.pmc(1));
    with_core_and_power(
        ctx,
        [
            format::percent(ratio(hits, hits + misses)),
            format::fixed2(ctx.per_ki(misses)),
            format::large_number(hits),
            pct_of_cycles(ctx, ctx.pmc(2)),
            pct_of_cycles(ctx, ctx.pmc(3)),
        ],
    )
}

const MEMORY_BOUND: MonitoringConfig = MonitoringConfig {
    name: "Memory Bound",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "PkgPower",
        "Instr/Watt",
        "No Execute",
        "Stall LDM Pending",
        "Stall, L1D Miss",
        "(Stall, L2 Miss)",
    ],
    help_text: "",
    program: CounterProgram::four(
        EventSelectSpec::new(0xA3, 0x04, "CYCLE_ACTIVITY.CYCLES_NO_EXECUTE").cmask(4),
        EventSelectSpec::new(0xA3, 0x06, "CYCLE_ACTIVITY.STALLS_LDM_PENDING").cmask(6),
        EventSelectSpec::new(0xA3, 0x0C, "CYCLE_ACTIVITY.STALLS_L1D_PENDING")
            .cmask(0x0C)
            .only_in_slot(2),
        EventSelectSpec::new(0xA3, 0x05, "CYCLE_ACTIVITY.STALLS_L2_PENDING")
            .cmask(5)
            .caveat("L2 miss stall counting is unverified on Haswell"),
    ),
    fold_overrides: &[],
    formula: four_cycle_fractions_with_power,
};

fn four_cycle_fractions_with_power(ctx: &MetricContext<'_>) -> Vec<String> {
    with_core_and_power(ctx, (0..4).map(|slot| pct_of_cycles(ctx, ctx.pmc(slot))))
}

const RETIRE_SLOTS: MonitoringConfig = MonitoringConfig {
    name: "Retire BW",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "PkgPower",
        "Instr/Watt",
        "Retire Slots Used",
        "Retire Slots/Instr",
        "Retire Slots/Clk",
        "Retire Active",
        "1 Slot",
        "2 Slots",
        "3 Slots",
        "4 Slots",
    ],
    help_text: "Up to 4 retire slots are used each cycle",
    program: CounterProgram::four(
        EventSelectSpec::new(0xC2, 0x02, "UOPS_RETIRED.RETIRE_SLOTS:c1").cmask(1),
        EventSelectSpec::new(0xC2, 0x02, "UOPS_RETIRED.RETIRE_SLOTS:c2").cmask(2),
        EventSelectSpec::new(0xC2, 0x02, "UOPS_RETIRED.RETIRE_SLOTS:c3").cmask(3),
        EventSelectSpec::new(0xC2, 0x02, "UOPS_RETIRED.RETIRE_SLOTS:c4").cmask(4),
    ),
    fold_overrides: &[],
    formula: retire_slots_row,
};

fn retire_slots_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (exact, used) = slot_histogram(ctx);
    let mut extra = vec![
        format::large_number(used),
        format::fixed2(ratio(used, ctx.sample.instructions)),
        format::fixed2(ctx.of_cycles(used)),
        pct_of_cycles(ctx, ctx.pmc(0)),
    ];
    extra.extend(exact.iter().map(|&cycles| pct_of_cycles(ctx, cycles)));
    with_core_and_power(ctx, extra)
}

const OFFCORE_BURST: MonitoringConfig = MonitoringConfig {
    name: "Offcore BW (Burst)",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Pkg Pwr",
        "Instr/Watt",
        "offcore req cmask 4",
        "offcore req cmask 8",
        "offcore req cmask 12",
        "offcore req cmask 16",
    ],
    help_text: "Cycles with at least N data reads or RFOs outstanding",
    program: CounterProgram::four(
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA:c4").cmask(4),
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA:c8").cmask(8),
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA:c12").cmask(12),
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA:c16").cmask(16),
    ),
    fold_overrides: &[],
    formula: four_cycle_fractions_with_power,
};

const OFFCORE_REQUESTS: MonitoringConfig = MonitoringConfig {
    name: "Offcore Reqs",
    family: Family::Haswell,
    columns: &[
        "Item",
        "Active Cycles",
        "Instructions",
        "IPC",
        "Pkg Pwr",
        "Instr/Watt",
        "Offcore Requests * 64B",
        "Offcore req latency",
        "SQ Full",
        "SQ cmask 16",
    ],
    help_text: "Latency is superqueue occupancy over requests",
    program: CounterProgram::four(
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA"),
        EventSelectSpec::new(0xB0, 0x0A, "OFFCORE_REQUESTS.DATA"),
        EventSelectSpec::new(0xB2, 0x01, "OFFCORE_REQUESTS_BUFFER.SQ_FULL"),
        EventSelectSpec::new(0x60, 0x0A, "OFFCORE_REQUESTS_OUTSTANDING.DATA:c16").cmask(16),
    ),
    fold_overrides: &[],
    formula: offcore_requests_row,
};

fn offcore_requests_row(ctx: &MetricContext<'_>) -> Vec<String> {
    let (occupancy, requests) = (ctx.pmc(0), ctx.pmc(1));
    with_core_and_power(
        ctx,
        [
            format::with_unit(ctx.per_second(64.0 * requests), "B/s"),
            ratio(occupancy, requests)
                .map(|clk| format!("{clk:.2} clk"))
                .unwrap_or_else(|| format::NOT_AVAILABLE.to_string()),
            pct_of_cycles(ctx, ctx.pmc(2)),
            pct_of_cycles(ctx, ctx.pmc(3)),
        ],
    )
}
