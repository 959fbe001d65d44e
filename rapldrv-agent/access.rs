//! Register access layer
//!
//! The only code allowed to touch hardware registers sits behind
//! [`RegisterAccess`]. The dispatcher receives it as an injected capability,
//! which keeps the privileged boundary in one place and lets tests and the
//! simulated service substitute [`SimulatedRegisters`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rapldrv_raw::rapl::msr;
use rapldrv_raw::MsrError;

use crate::error::Result;

/// Privileged read/write of numbered 64-bit registers
///
/// Implementations must be callable from several threads at once; the
/// dispatcher shares one instance across all in-flight requests.
pub trait RegisterAccess: Send + Sync {
    fn read(&self, register: u32) -> Result<u64>;

    fn write(&self, register: u32, value: u64) -> Result<()>;
}

/// In-memory register file
///
/// Registers that were never defined behave like unimplemented MSRs: the
/// access fails with `EIO`, just as the Linux `msr` driver reports it.
/// Energy counters registered with [`SimulatedRegisters::with_counter`]
/// advance on every read so that power sampling sees a live package.
pub struct SimulatedRegisters {
    registers: RwLock<HashMap<u32, u64>>,
    counters: HashMap<u32, u64>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl SimulatedRegisters {
    pub fn new() -> Self {
        Self {
            registers: RwLock::new(HashMap::new()),
            counters: HashMap::new(),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// A package with plausible RAPL contents
    pub fn rapl_package() -> Self {
        Self::new()
            // 1/8 W, 1/16384 J, 1/1024 s
            .with_register(msr::MSR_RAPL_POWER_UNIT, 0x000A_0E03)
            // PL1 = 15 W enabled, PL2 = 25 W enabled
            .with_register(msr::MSR_PKG_POWER_LIMIT, 0x0000_80C8_0000_8078)
            .with_register(msr::MSR_PKG_POWER_INFO, 0x0000_0000_0000_0078)
            .with_register(msr::MSR_PP0_POWER_LIMIT, 0)
            .with_counter(msr::MSR_PKG_ENERGY_STATUS, 0x1000_0000, 16_384)
            .with_counter(msr::MSR_PP0_ENERGY_STATUS, 0x0800_0000, 8_192)
            .with_counter(msr::MSR_DRAM_ENERGY_STATUS, 0x0200_0000, 2_048)
    }

    pub fn with_register(self, register: u32, value: u64) -> Self {
        self.registers.write().insert(register, value);
        self
    }

    /// Define a 32-bit energy counter that advances by `step` per read
    pub fn with_counter(mut self, register: u32, start: u32, step: u64) -> Self {
        self.registers.write().insert(register, u64::from(start));
        self.counters.insert(register, step);
        self
    }

    /// Number of reads served, successful or not
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes attempted, successful or not
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current contents of a register, without counting as an access
    pub fn peek(&self, register: u32) -> Option<u64> {
        self.registers.read().get(&register).copied()
    }

    fn fault(register: u32, write: bool) -> MsrError {
        let source = std::io::Error::from_raw_os_error(libc::EIO);
        if write {
            MsrError::WriteFailed {
                cpu: 0,
                msr: register,
                source,
            }
        } else {
            MsrError::ReadFailed {
                cpu: 0,
                msr: register,
                source,
            }
        }
    }
}

impl Default for SimulatedRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAccess for SimulatedRegisters {
    fn read(&self, register: u32) -> Result<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let mut registers = self.registers.write();
        let value = registers
            .get_mut(&register)
            .ok_or_else(|| Self::fault(register, false))?;
        let current = *value;

        if let Some(step) = self.counters.get(&register) {
            *value = u64::from((current as u32).wrapping_add(*step as u32));
        }

        tracing::debug!("Simulated read: MSR 0x{:08x} = 0x{:016x}", register, current);
        Ok(current)
    }

    fn write(&self, register: u32, value: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut registers = self.registers.write();
        let slot = registers
            .get_mut(&register)
            .ok_or_else(|| Self::fault(register, true))?;
        *slot = value;

        tracing::debug!("Simulated write: MSR 0x{:08x} <- 0x{:016x}", register, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_defined_register() {
        let regs = SimulatedRegisters::new().with_register(0x606, 0xA0E03);
        assert_eq!(regs.read(0x606).unwrap(), 0xA0E03);
        assert_eq!(regs.read(0x606).unwrap(), 0xA0E03);
        assert_eq!(regs.reads(), 2);
    }

    #[test]
    fn test_unknown_register_faults() {
        let regs = SimulatedRegisters::new();
        let err = regs.read(0xDEAD).unwrap_err();
        assert!(err.is_register_fault());
        assert!(regs.write(0xDEAD, 1).unwrap_err().is_register_fault());
        assert_eq!(regs.reads(), 1);
        assert_eq!(regs.writes(), 1);
    }

    #[test]
    fn test_counter_advances_and_wraps() {
        let regs = SimulatedRegisters::new().with_counter(0x611, u32::MAX - 1, 4);
        assert_eq!(regs.read(0x611).unwrap(), u64::from(u32::MAX - 1));
        assert_eq!(regs.read(0x611).unwrap(), 2);
        assert_eq!(regs.peek(0x611), Some(6));
    }

    #[test]
    fn test_write_then_read() {
        let regs = SimulatedRegisters::rapl_package();
        regs.write(msr::MSR_PKG_POWER_LIMIT, 42).unwrap();
        assert_eq!(regs.read(msr::MSR_PKG_POWER_LIMIT).unwrap(), 42);
    }
}
