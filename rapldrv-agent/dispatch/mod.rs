//! Control-request dispatch
//!
//! A request carries a control code and an input buffer. In the buffered
//! protocol the input holds a little-endian register number; numbers in the
//! sentinel table resolve to diagnostic values, anything else is read through
//! the register access layer. The result is one little-endian `u64`.

pub mod direct;
pub mod dispatcher;
pub mod request;
pub mod status;
pub mod table;

pub use direct::{DirectFunction, DirectIo};
pub use dispatcher::Dispatcher;
pub use request::{Completion, Request, REGISTER_NUMBER_SIZE, REGISTER_VALUE_SIZE};
pub use status::Status;
pub use table::{Sentinel, SentinelTable, DIAGNOSTIC_SENTINELS};
