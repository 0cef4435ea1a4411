use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use coreflow_raw::MsrDevice;

use crate::error::{CoreflowError, Result};

/// The privileged register channel, the sole hardware I/O boundary
///
/// `cpu` is the OS CPU number of the logical thread whose register file is
/// addressed.
pub trait MsrDriver: Send + Sync {
    /// Confirm the channel can be opened at all
    ///
    /// Fails with [`CoreflowError::DriverUnavailable`] when it cannot.
    fn probe(&self) -> Result<()>;

    fn read_msr(&self, cpu: u32, addr: u64) -> Result<u64>;

    fn write_msr(&self, cpu: u32, addr: u64, value: u64) -> Result<()>;
}

/// `/dev/cpu/<n>/msr` with one cached device handle per CPU
pub struct DevMsrDriver {
    handles: RwLock<HashMap<u32, Arc<MsrDevice>>>,
    probe_cpu: u32,
}

impl DevMsrDriver {
    /// `probe_cpu` is opened by [`MsrDriver::probe`]; use the first online CPU
    pub fn new(probe_cpu: u32) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            probe_cpu,
        }
    }

    fn get_handle(&self, cpu: u32) -> Result<Arc<MsrDevice>> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&cpu) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&cpu) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(MsrDevice::open(cpu)?);
        tracing::info!("Opened MSR device for CPU {}", cpu);
        handles.insert(cpu, Arc::clone(&handle));
        Ok(handle)
    }
}

impl MsrDriver for DevMsrDriver {
    fn probe(&self) -> Result<()> {
        self.get_handle(self.probe_cpu).map(|_| ()).map_err(|e| match e {
            CoreflowError::DriverUnavailable(msg) => CoreflowError::DriverUnavailable(format!(
                "{msg} (load the msr module with `modprobe msr` and run as root)"
            )),
            other => other,
        })
    }

    fn read_msr(&self, cpu: u32, addr: u64) -> Result<u64> {
        let value = self.get_handle(cpu)?.read(addr)?;
        tracing::debug!("MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}", cpu, addr, value);
        Ok(value)
    }

    fn write_msr(&self, cpu: u32, addr: u64, value: u64) -> Result<()> {
        tracing::debug!("MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}", cpu, addr, value);
        self.get_handle(cpu)?.write(addr, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_driver_unavailable() {
        // No CPU has this number, so the device node cannot exist
        let driver = DevMsrDriver::new(u32::MAX - 1);
        let err = driver.probe().unwrap_err();
        assert!(matches!(err, CoreflowError::DriverUnavailable(_)));
        assert!(err.to_string().contains("modprobe msr"));
    }
}
