pub mod clock;
pub mod msr;
pub mod platform;

pub use clock::{MonotonicClock, TickSource};
pub use msr::{Msr, MsrAccess, MsrHandle};
pub use platform::{check_msr_device, CpuInfo, MsrDeviceIssue, CPU_INFO};
