// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod access;
pub mod client;
pub mod common;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod energy;
pub mod error;
pub mod prom;
pub mod server;
pub mod wire;

pub use access::{RegisterAccess, SimulatedRegisters};
pub use client::Client;
pub use config::DriverConfig;
pub use device::Device;
pub use dispatch::{Dispatcher, Request, Status};
pub use error::{RaplDrvError, Result};
pub use prom::DispatchMetricExporter;
pub use server::Server;
