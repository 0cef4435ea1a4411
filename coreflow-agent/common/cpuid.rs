use coreflow_raw::current_arch::core::PmuCapabilities;

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// 12-byte vendor string from leaf 0, e.g. "GenuineIntel"
pub fn vendor() -> String {
    let (_eax, ebx, ecx, edx) = cpuid(0, 0);
    [ebx, edx, ecx]
        .iter()
        .flat_map(|r| r.to_le_bytes())
        .map(char::from)
        .collect()
}

/// Counter counts and widths from leaf 0xA, or defaults when the leaf is
/// not implemented
pub fn pmu_capabilities() -> PmuCapabilities {
    let (max_leaf, _ebx, _ecx, _edx) = cpuid(0, 0);
    if max_leaf < 0x0A {
        tracing::warn!("CPUID leaf 0xA unavailable, assuming 48-bit counters");
        return PmuCapabilities::default();
    }

    let (eax, _ebx, _ecx, edx) = cpuid(0x0A, 0);
    let caps = PmuCapabilities::from_cpuid(eax, edx);
    if caps.version == 0 {
        tracing::warn!("Architectural PMU not reported, assuming 48-bit counters");
        return PmuCapabilities::default();
    }

    tracing::info!(
        "PMU v{}: {} general counters ({} bits), {} fixed counters ({} bits)",
        caps.version,
        caps.general_counters,
        caps.general_width,
        caps.fixed_counters,
        caps.fixed_width
    );
    caps
}
