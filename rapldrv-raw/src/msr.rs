//! MSR (Model-Specific Register) read/write primitives
//!
//! This module provides low-level MSR access through `/dev/cpu/*/msr`.
//! The device file maps the register number to the file offset, so a
//! positioned read of 8 bytes at offset `msr` returns the register value.
//! For cached access pinned to a CPU, use the register access layer in
//! rapldrv-agent.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },
}

impl MsrError {
    /// The underlying OS error, if any
    pub fn io_error(&self) -> &std::io::Error {
        match self {
            MsrError::OpenFailed { source, .. }
            | MsrError::ReadFailed { source, .. }
            | MsrError::WriteFailed { source, .. } => source,
        }
    }

    /// True when the kernel rejected the register itself (the hardware
    /// raised a general-protection fault on the access).
    pub fn is_register_fault(&self) -> bool {
        matches!(
            self,
            MsrError::ReadFailed { .. } | MsrError::WriteFailed { .. }
        ) && self.io_error().raw_os_error() == Some(libc::EIO)
    }
}

/// Path of the MSR device node for a CPU
pub fn msr_device_path(cpu: u32) -> String {
    format!("/dev/cpu/{cpu}/msr")
}

/// Open the MSR device of `cpu` for reading and, if `writable`, writing.
pub fn open_msr(cpu: u32, writable: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .custom_flags(if writable { libc::O_SYNC } else { 0 })
        .open(msr_device_path(cpu))
        .map_err(|e| MsrError::OpenFailed { cpu, source: e })
}

/// Read a register through an already opened MSR device file
pub fn read_msr_at(file: &File, cpu: u32, msr: u32) -> Result<u64> {
    let mut buffer = [0u8; 8];
    file.read_exact_at(&mut buffer, u64::from(msr))
        .map_err(|e| MsrError::ReadFailed {
            cpu,
            msr,
            source: e,
        })?;

    Ok(u64::from_le_bytes(buffer))
}

/// Write a register through an already opened MSR device file
pub fn write_msr_at(file: &File, cpu: u32, msr: u32, value: u64) -> Result<()> {
    file.write_all_at(&value.to_le_bytes(), u64::from(msr))
        .map_err(|e| MsrError::WriteFailed {
            cpu,
            msr,
            source: e,
        })
}

/// Read a 64-bit value from an MSR
///
/// # Arguments
///
/// * `cpu` - CPU core number (0-indexed)
/// * `msr` - MSR address (e.g., 0x611 for MSR_PKG_ENERGY_STATUS)
///
/// # Errors
///
/// Returns an error if:
/// - The MSR device cannot be opened (requires root/CAP_SYS_RAWIO)
/// - The MSR address is not implemented by the CPU
///
/// # Example
///
/// ```ignore
/// use rapldrv_raw::read_msr;
///
/// let value = read_msr(0, 0x611)?;
/// println!("MSR 0x611 = 0x{:016X}", value);
/// ```
pub fn read_msr(cpu: u32, msr: u32) -> Result<u64> {
    let file = open_msr(cpu, false)?;
    read_msr_at(&file, cpu, msr)
}

/// Write a 64-bit value to an MSR
///
/// # Safety
///
/// Writing incorrect values to MSRs can cause system instability or crashes.
/// Always validate register values using `RegisterLayout::validate()` before writing.
pub fn write_msr(cpu: u32, msr: u32, value: u64) -> Result<()> {
    let file = open_msr(cpu, true)?;
    write_msr_at(&file, cpu, msr, value)
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
        assert!(!err.is_register_fault());
    }

    #[test]
    fn test_register_fault_detection() {
        let err = MsrError::ReadFailed {
            cpu: 2,
            msr: 0xDEAD,
            source: std::io::Error::from_raw_os_error(libc::EIO),
        };
        assert!(err.is_register_fault());
        assert!(err.to_string().contains("0xDEAD"));
        assert!(err.to_string().contains("CPU 2"));
    }

    #[test]
    fn test_device_path() {
        assert_eq!(msr_device_path(3), "/dev/cpu/3/msr");
    }
}
