use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaplDrvError {
    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error(transparent)]
    RawMsr(#[from] rapldrv_raw::MsrError),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl RaplDrvError {
    /// True when the hardware rejected the register number itself
    pub fn is_register_fault(&self) -> bool {
        match self {
            RaplDrvError::RawMsr(e) => e.is_register_fault(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RaplDrvError>;
