//! Control-code layout
//!
//! A control code packs four fields into 32 bits, following the common
//! device I/O control convention:
//!
//! | Bits   | Field           | Description                              |
//! |--------|-----------------|------------------------------------------|
//! | 0-1    | method          | Buffer transfer method                   |
//! | 2-13   | function        | Function selector                        |
//! | 14-15  | required_access | Access the caller must hold on the handle|
//! | 16-31  | device_type     | Device class                             |
//!
//! Callers built against the same convention produce codes that decode
//! bit-for-bit identically here.

/// Device class used by the RAPL service
pub const FILE_DEVICE_UNKNOWN: u16 = 0x22;

/// Function selector mask after shifting out the method bits
pub const FUNCTION_MASK: u32 = 0xFFF;

/// Extract the 12-bit function selector from a control code.
///
/// Pure and total: every 32-bit input maps to a defined selector.
pub const fn function_from_code(code: u32) -> u16 {
    ((code >> 2) & FUNCTION_MASK) as u16
}

/// Build a control code from its fields.
///
/// Fields wider than their slot are truncated to the slot width.
pub const fn ctl_code(
    device_type: u16,
    function: u16,
    method: TransferMethod,
    access: RequiredAccess,
) -> u32 {
    ((device_type as u32) << 16)
        | ((access as u32 & 0x3) << 14)
        | ((function as u32 & FUNCTION_MASK) << 2)
        | (method as u32 & 0x3)
}

/// How the request buffers are handed to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TransferMethod {
    Buffered = 0,
    InDirect = 1,
    OutDirect = 2,
    Neither = 3,
}

impl TransferMethod {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => TransferMethod::Buffered,
            1 => TransferMethod::InDirect,
            2 => TransferMethod::OutDirect,
            _ => TransferMethod::Neither,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransferMethod::Buffered => "buffered",
            TransferMethod::InDirect => "in-direct",
            TransferMethod::OutDirect => "out-direct",
            TransferMethod::Neither => "neither",
        }
    }
}

/// Access rights a caller must hold on its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequiredAccess {
    Any = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl RequiredAccess {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => RequiredAccess::Any,
            1 => RequiredAccess::Read,
            2 => RequiredAccess::Write,
            _ => RequiredAccess::ReadWrite,
        }
    }
}

/// A decoded view over a raw control code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCode(pub u32);

impl ControlCode {
    pub const fn new(
        device_type: u16,
        function: u16,
        method: TransferMethod,
        access: RequiredAccess,
    ) -> Self {
        Self(ctl_code(device_type, function, method, access))
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn device_type(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn required_access(&self) -> RequiredAccess {
        RequiredAccess::from_bits(self.0 >> 14)
    }

    pub const fn function(&self) -> u16 {
        function_from_code(self.0)
    }

    pub const fn method(&self) -> TransferMethod {
        TransferMethod::from_bits(self.0)
    }
}

impl From<u32> for ControlCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl std::fmt::Display for ControlCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:08X} (device 0x{:04X}, function 0x{:03X}, {})",
            self.0,
            self.device_type(),
            self.function(),
            self.method().name()
        )
    }
}
