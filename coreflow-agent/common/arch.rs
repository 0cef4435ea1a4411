// CPU microarchitecture detection and plugin family selection

use once_cell::sync::Lazy;

use crate::common::cpuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArchitecture {
    SandyBridge,
    IvyBridge,
    Haswell,
    Broadwell,
    Skylake,
    Unknown,
}

impl CpuArchitecture {
    pub fn name(&self) -> &'static str {
        match self {
            CpuArchitecture::SandyBridge => "Sandy Bridge",
            CpuArchitecture::IvyBridge => "Ivy Bridge",
            CpuArchitecture::Haswell => "Haswell",
            CpuArchitecture::Broadwell => "Broadwell",
            CpuArchitecture::Skylake => "Skylake",
            CpuArchitecture::Unknown => "Unknown",
        }
    }

    /// Classify a family-6 display model number
    pub fn from_model(display_model: u32) -> Self {
        match display_model {
            0x2A | 0x2D => CpuArchitecture::SandyBridge,
            0x3A | 0x3E => CpuArchitecture::IvyBridge,
            0x3C | 0x3F | 0x45 | 0x46 => CpuArchitecture::Haswell,
            0x3D | 0x47 | 0x4F | 0x56 => CpuArchitecture::Broadwell,
            0x4E | 0x5E | 0x55 | 0x8E | 0x9E => CpuArchitecture::Skylake,
            _ => CpuArchitecture::Unknown,
        }
    }

    /// The plugin family whose event tables are valid on this part
    pub fn family(&self) -> Option<Family> {
        match self {
            CpuArchitecture::SandyBridge | CpuArchitecture::IvyBridge => Some(Family::SandyBridge),
            CpuArchitecture::Haswell | CpuArchitecture::Broadwell => Some(Family::Haswell),
            CpuArchitecture::Skylake | CpuArchitecture::Unknown => None,
        }
    }
}

/// A microarchitecture family with its own set of monitoring configs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    SandyBridge,
    Haswell,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::SandyBridge => "Sandy Bridge",
            Family::Haswell => "Haswell",
        }
    }
}

pub static CPU_ARCH: Lazy<CpuArchitecture> = Lazy::new(detect_architecture);

fn detect_architecture() -> CpuArchitecture {
    let vendor = cpuid::vendor();
    if vendor != "GenuineIntel" {
        tracing::warn!("Non-Intel CPU detected: {}", vendor);
        return CpuArchitecture::Unknown;
    }

    // CPUID leaf 1: Family, Model, Stepping
    let (eax, _ebx, _ecx, _edx) = cpuid::cpuid(1, 0);

    let stepping = eax & 0xF;
    let model = (eax >> 4) & 0xF;
    let family = (eax >> 8) & 0xF;
    let extended_model = (eax >> 16) & 0xF;
    let extended_family = (eax >> 20) & 0xFF;

    let display_family = if family == 0xF {
        family + extended_family
    } else {
        family
    };

    let display_model = if family == 0x6 || family == 0xF {
        (extended_model << 4) + model
    } else {
        model
    };

    tracing::info!(
        "CPU: Family {:X}, Model {:X}, Stepping {:X}",
        display_family,
        display_model,
        stepping
    );

    if display_family != 0x6 {
        tracing::warn!("Unsupported Intel family {:X}", display_family);
        return CpuArchitecture::Unknown;
    }

    let arch = CpuArchitecture::from_model(display_model);
    if arch == CpuArchitecture::Unknown {
        tracing::warn!("Unknown Intel CPU model: {:X}", display_model);
    } else {
        tracing::info!("Detected CPU architecture: {}", arch.name());
    }
    arch
}
