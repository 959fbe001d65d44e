//! # rapldrv-raw
//!
//! Hardware definitions for the rapldrv RAPL register service.
//!
//! This crate provides the control-code layout shared by the service and its
//! callers, the RAPL MSR catalogue with typed register layouts, and the raw
//! `/dev/cpu/*/msr` read/write primitives.
//!
//! ## Usage
//!
//! ```ignore
//! use rapldrv_raw::rapl::{msr, RaplPowerUnit};
//! use rapldrv_raw::{read_msr, RegisterLayout};
//!
//! let unit = RaplPowerUnit::from_msr_value(read_msr(0, msr::MSR_RAPL_POWER_UNIT)?);
//! println!("energy unit: {} J", unit.energy_unit_multiplier());
//! ```

pub mod ioctl;
pub mod msr;
pub mod rapl;
pub mod register;

pub use ioctl::{function_from_code, ControlCode, RequiredAccess, TransferMethod};
pub use msr::{read_msr, write_msr, MsrError, Result};
pub use register::RegisterLayout;
