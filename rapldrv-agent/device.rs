use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dispatch::{Dispatcher, Request, Status};
use crate::error::{RaplDrvError, Result};

/// An open handle on the device
///
/// Carries no state: opening only proves the device was ready to accept
/// requests at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    _private: (),
}

/// The dispatcher published under its well-known name
pub struct Device {
    name: String,
    path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    accepting: AtomicBool,
}

impl Device {
    pub fn create(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        dispatcher: Dispatcher,
    ) -> Self {
        let device = Self {
            name: name.into(),
            path: path.into(),
            dispatcher: Arc::new(dispatcher),
            accepting: AtomicBool::new(true),
        };
        tracing::info!("Created device {} at {}", device.name, device.path.display());
        device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> Result<Handle> {
        if !self.is_accepting() {
            return Err(RaplDrvError::DeviceError(format!(
                "device {} is shutting down",
                self.name
            )));
        }
        tracing::debug!("Creating handle on {}", self.name);
        Ok(Handle { _private: () })
    }

    pub fn close(&self, _handle: Handle) -> Status {
        tracing::debug!("Closing handle on {}", self.name);
        Status::Success
    }

    pub fn cleanup(&self, _handle: &Handle) -> Status {
        tracing::debug!("Cleanup handle on {}", self.name);
        Status::Success
    }

    /// Forward a device-control request to the dispatcher
    ///
    /// Requests already running when `shutdown` is called still complete;
    /// requests arriving afterwards fail with `DeviceNotReady`.
    pub fn control(&self, _handle: &Handle, mut req: Request) -> Request {
        if !self.is_accepting() {
            req.fail(Status::DeviceNotReady);
            return req;
        }
        self.dispatcher.handle(req)
    }

    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("Device {} stopped accepting requests", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimulatedRegisters;
    use crate::common::clock::MonotonicClock;

    fn device() -> Device {
        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedRegisters::rapl_package()),
            Arc::new(MonotonicClock),
        );
        Device::create("RAPLDriver", "/tmp/rapldrv-test.sock", dispatcher)
    }

    #[test]
    fn test_open_close_cleanup_acknowledge() {
        let device = device();
        let handle = device.open().unwrap();
        assert_eq!(device.cleanup(&handle), Status::Success);
        assert_eq!(device.close(handle), Status::Success);
        assert_eq!(device.name(), "RAPLDriver");
    }

    #[test]
    fn test_control_dispatches() {
        let device = device();
        let handle = device.open().unwrap();
        let req = device.control(&handle, Request::read_register(0x2FB0, 1));
        assert_eq!(req.value(), Some(0x1111_1111_1111_1111));
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let device = device();
        let handle = device.open().unwrap();
        device.shutdown();

        assert!(!device.is_accepting());
        assert!(device.open().is_err());

        let req = device.control(&handle, Request::read_register(0x2FB0, 1));
        assert_eq!(req.status(), Status::DeviceNotReady);
        assert_eq!(req.value(), None);
    }
}
