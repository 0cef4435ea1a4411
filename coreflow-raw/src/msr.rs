//! MSR (Model-Specific Register) device primitives
//!
//! Access goes through the Linux `msr` driver at `/dev/cpu/<n>/msr`, where
//! the file offset is the register address. Every access is bound to the
//! logical CPU named in the path, independent of the caller's affinity.
//! Opening the device requires root or `CAP_SYS_RAWIO`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },
}

impl MsrError {
    /// True when the device itself is missing or not permitted, as opposed
    /// to a single register rejecting the access.
    pub fn is_device_unavailable(&self) -> bool {
        match self {
            MsrError::OpenFailed { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// Path of the MSR device node for a logical CPU
pub fn device_path(cpu: u32) -> PathBuf {
    PathBuf::from(format!("/dev/cpu/{cpu}/msr"))
}

/// An open MSR device bound to one logical CPU
#[derive(Debug)]
pub struct MsrDevice {
    file: File,
    cpu: u32,
}

impl MsrDevice {
    /// Open the MSR device of `cpu` for reading and writing
    pub fn open(cpu: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device_path(cpu))
            .map_err(|source| MsrError::OpenFailed { cpu, source })?;

        Ok(Self { file, cpu })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Read a 64-bit register
    ///
    /// The driver reports `EIO` for registers the CPU does not implement.
    pub fn read(&self, msr: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.file
            .read_exact_at(&mut buffer, msr)
            .map_err(|source| MsrError::ReadFailed {
                cpu: self.cpu,
                msr,
                source,
            })?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Write a 64-bit register
    ///
    /// Writing reserved bits faults inside the kernel and comes back as
    /// `EIO`; nothing is partially applied.
    pub fn write(&self, msr: u64, value: u64) -> Result<()> {
        self.file
            .write_all_at(&value.to_le_bytes(), msr)
            .map_err(|source| MsrError::WriteFailed {
                cpu: self.cpu,
                msr,
                source,
            })
    }
}

/// One-shot read that opens and closes the device
pub fn read_msr(cpu: u32, msr: u64) -> Result<u64> {
    MsrDevice::open(cpu)?.read(msr)
}

/// One-shot write that opens and closes the device
pub fn write_msr(cpu: u32, msr: u64, value: u64) -> Result<()> {
    MsrDevice::open(cpu)?.write(msr, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_error_display() {
        let err = MsrError::OpenFailed {
            cpu: 0,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open MSR device"));
    }

    #[test]
    fn test_device_unavailable_classification() {
        let missing = MsrError::OpenFailed {
            cpu: 3,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(missing.is_device_unavailable());

        let rejected = MsrError::ReadFailed {
            cpu: 3,
            msr: 0x611,
            source: std::io::Error::from(std::io::ErrorKind::Other),
        };
        assert!(!rejected.is_device_unavailable());
    }

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(7), PathBuf::from("/dev/cpu/7/msr"));
    }
}
