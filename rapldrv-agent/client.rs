use std::path::Path;

use rapldrv_raw::ioctl::{ctl_code, FILE_DEVICE_UNKNOWN};
use rapldrv_raw::{RegisterLayout, RequiredAccess, TransferMethod};
use tokio::net::UnixStream;

use crate::dispatch::{Request, Status};
use crate::error::{RaplDrvError, Result};
use crate::wire::{self, Response};

/// Control code used for buffered register reads
pub const READ_REGISTER_CODE: u32 = ctl_code(
    FILE_DEVICE_UNKNOWN,
    0xBEB,
    TransferMethod::Buffered,
    RequiredAccess::Any,
);

/// A caller holding an open handle on the device socket
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            RaplDrvError::DeviceError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its completion
    pub async fn call(&mut self, req: &Request) -> Result<Response> {
        wire::write_request(&mut self.stream, req).await?;
        wire::read_response(&mut self.stream).await
    }

    /// Read one register; a failure status becomes an error
    pub async fn read_register(&mut self, register: u32) -> Result<u64> {
        let resp = self
            .call(&Request::read_register(READ_REGISTER_CODE, register))
            .await?;

        resp.value().ok_or_else(|| {
            let status = resp
                .status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("unknown status 0x{:08X}", resp.status));
            RaplDrvError::DeviceError(format!("Reading MSR 0x{register:X} failed: {status}"))
        })
    }

    /// Read the register a layout lives in and decode it
    pub async fn read_layout<T: RegisterLayout>(&mut self) -> Result<T> {
        Ok(T::from_msr_value(self.read_register(T::ADDRESS).await?))
    }

    /// True when the diagnostic sentinels answer as expected
    pub async fn ping(&mut self) -> Result<bool> {
        let one = self.call(&Request::read_register(READ_REGISTER_CODE, 1)).await?;
        let two = self.call(&Request::read_register(READ_REGISTER_CODE, 2)).await?;
        Ok(one.status() == Some(Status::Success)
            && one.value() == Some(0x1111_1111_1111_1111)
            && two.value() == Some(0x2222_2222_2222_2222))
    }
}
