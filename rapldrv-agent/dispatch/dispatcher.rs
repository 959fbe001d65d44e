use std::sync::Arc;

use rapldrv_raw::TransferMethod;

use super::direct::{DirectFunction, DirectIo};
use super::request::{Request, REGISTER_NUMBER_SIZE, REGISTER_VALUE_SIZE};
use super::status::Status;
use super::table::{Sentinel, SentinelTable};
use crate::access::RegisterAccess;
use crate::common::clock::TickSource;
use crate::config::{DriverConfig, RegisterSet};

/// Routes one request to a register value
///
/// The dispatcher keeps no state between requests: every field is fixed at
/// construction, so one instance serves concurrent callers without locking.
/// Register numbers outside the sentinel table are forwarded to the access
/// layer as given unless an allow-list is configured.
pub struct Dispatcher {
    access: Arc<dyn RegisterAccess>,
    clock: Arc<dyn TickSource>,
    sentinels: SentinelTable,
    allow_list: Option<RegisterSet>,
    direct: Option<DirectIo>,
}

impl Dispatcher {
    pub fn new(access: Arc<dyn RegisterAccess>, clock: Arc<dyn TickSource>) -> Self {
        Self {
            access,
            clock,
            sentinels: SentinelTable::default(),
            allow_list: None,
            direct: None,
        }
    }

    pub fn from_config(
        config: &DriverConfig,
        access: Arc<dyn RegisterAccess>,
        clock: Arc<dyn TickSource>,
    ) -> Self {
        let mut dispatcher = Self::new(access, clock);
        if let Some(allow) = &config.allow_list {
            dispatcher = dispatcher.with_allow_list(allow.clone());
        }
        if config.direct_io {
            dispatcher = dispatcher.with_direct_io(DirectIo {
                write_back: config.write_back,
            });
        }
        dispatcher
    }

    pub fn with_sentinels(mut self, sentinels: SentinelTable) -> Self {
        self.sentinels = sentinels;
        self
    }

    /// Restrict hardware reads to `registers`; sentinels stay reachable
    pub fn with_allow_list(mut self, registers: RegisterSet) -> Self {
        self.allow_list = Some(registers);
        self
    }

    pub fn with_direct_io(mut self, direct: DirectIo) -> Self {
        if direct.write_back {
            tracing::warn!("Direct I/O write-back enabled: reads will overwrite RAPL registers");
        }
        self.direct = Some(direct);
        self
    }

    pub fn sentinels(&self) -> &SentinelTable {
        &self.sentinels
    }

    /// Handle one request and hand it back with its completion filled in
    pub fn handle(&self, mut req: Request) -> Request {
        self.dispatch(&mut req);
        req
    }

    fn dispatch(&self, req: &mut Request) {
        let code = req.control_code();
        tracing::debug!("Received control code {}", code);
        tracing::debug!("Received function code 0x{:03X}", code.function());

        if let Some(direct) = self.direct {
            if code.method() == TransferMethod::OutDirect {
                return self.dispatch_direct(req, direct);
            }
        }

        let Some(register) = req.register_number() else {
            tracing::warn!(
                "Bad input length provided. Expected {} bytes, got {}.",
                REGISTER_NUMBER_SIZE,
                req.input_length()
            );
            return req.fail(Status::InvalidRequest);
        };

        if (req.output_length() as usize) < REGISTER_VALUE_SIZE {
            tracing::warn!(
                "Output buffer too small. Expected {} bytes, got {}.",
                REGISTER_VALUE_SIZE,
                req.output_length()
            );
            return req.fail(Status::BufferTooSmall);
        }

        let result = match self.sentinels.lookup(register) {
            Some(Sentinel::Fixed(value)) => Ok(value),
            Some(Sentinel::Timestamp) => self.timestamp(),
            None => self.read_register(register),
        };

        match result {
            Ok(value) => req.complete(value),
            Err(status) => req.fail(status),
        }
    }

    fn dispatch_direct(&self, req: &mut Request, direct: DirectIo) {
        let function = req.control_code().function();
        let Some(op) = DirectFunction::from_function(function) else {
            tracing::warn!("Unknown function code 0x{:04x}, ignoring.", function);
            return req.fail(Status::UnsupportedOperation);
        };

        if (req.output_length() as usize) < REGISTER_VALUE_SIZE {
            return req.fail(Status::BufferTooSmall);
        }

        let register = op.register();
        let value = match self.read_register(register) {
            Ok(value) => value,
            Err(status) => return req.fail(status),
        };

        if direct.write_back {
            let written = self.timestamp().and_then(|ticks| {
                self.access.write(register, ticks).map_err(|e| {
                    tracing::error!("Write-back to MSR 0x{:X} failed: {}", register, e);
                    Status::from_error(&e)
                })
            });
            if let Err(status) = written {
                return req.fail(status);
            }
        }

        tracing::debug!("{} -> 0x{:016x}", op.name(), value);
        req.complete(value);
    }

    fn read_register(&self, register: u32) -> Result<u64, Status> {
        if let Some(allow) = &self.allow_list {
            if !allow.contains(register) {
                tracing::warn!("MSR 0x{:X} is not in the allow-list, rejecting", register);
                return Err(Status::AccessDenied);
            }
        }

        self.access.read(register).map_err(|e| {
            tracing::error!("Reading MSR 0x{:X} failed: {}", register, e);
            Status::from_error(&e)
        })
    }

    fn timestamp(&self) -> Result<u64, Status> {
        self.clock.now_ticks().map_err(|e| {
            tracing::error!("Reading the monotonic clock failed: {}", e);
            Status::AccessFault
        })
    }
}
