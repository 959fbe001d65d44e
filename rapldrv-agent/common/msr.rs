use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use rapldrv_raw::msr::{open_msr, read_msr_at, write_msr_at};

use crate::access::RegisterAccess;
use crate::error::Result;

/// An open `/dev/cpu/<n>/msr` device file
///
/// Reads and writes are positioned, so one handle is shared by concurrent
/// requests without a lock around the file offset.
pub struct MsrHandle {
    file: File,
    cpu_id: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self> {
        // Fall back to read-only so deployments without write access can still serve reads
        let file = match open_msr(cpu, true) {
            Ok(file) => file,
            Err(e) if e.io_error().kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("MSR device of CPU {} is not writable, opening read-only", cpu);
                open_msr(cpu, false)?
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self { file, cpu_id: cpu })
    }

    pub fn read(&self, addr: u32) -> Result<u64> {
        let value = read_msr_at(&self.file, self.cpu_id, addr)?;
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    pub fn write(&self, addr: u32, value: u64) -> Result<()> {
        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        write_msr_at(&self.file, self.cpu_id, addr, value)?;
        Ok(())
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }
}

/// Process-wide cache of MSR device handles, one per CPU
pub struct Msr {
    handles: RwLock<HashMap<u32, Arc<MsrHandle>>>,
}

impl Msr {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static Msr {
        static INSTANCE: Lazy<Msr> = Lazy::new(Msr::new);
        &INSTANCE
    }

    fn get_handle(&self, cpu: u32) -> Result<Arc<MsrHandle>> {
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

        let handle = Arc::new(MsrHandle::new(cpu)?);
        handles.insert(cpu, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn read(&self, cpu: u32, addr: u32) -> Result<u64> {
        let handle = self.get_handle(cpu)?;
        handle.read(addr)
    }

    pub fn write(&self, cpu: u32, addr: u32, value: u64) -> Result<()> {
        let handle = self.get_handle(cpu)?;
        handle.write(addr, value)
    }
}

/// Register access layer backed by the Linux `msr` driver
///
/// The kernel executes the access on `cpu` and turns the general-protection
/// fault of an unimplemented register into `EIO`, so a bad register number
/// surfaces as an error here instead of faulting the caller.
#[derive(Debug, Clone, Copy)]
pub struct MsrAccess {
    cpu: u32,
}

impl MsrAccess {
    /// Open (and cache) the device of `cpu` up front so permission
    /// problems show at startup rather than on the first request.
    pub fn open(cpu: u32) -> Result<Self> {
        Msr::instance().get_handle(cpu)?;
        Ok(Self { cpu })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }
}

impl RegisterAccess for MsrAccess {
    fn read(&self, register: u32) -> Result<u64> {
        Msr::instance().read(self.cpu, register)
    }

    fn write(&self, register: u32, value: u64) -> Result<()> {
        Msr::instance().write(self.cpu, register, value)
    }
}
