use crate::enum_with_data;
use crate::error::RaplDrvError;

enum_with_data! {
    /// Completion status of a request
    ///
    /// Wire values follow the NTSTATUS convention so callers written against
    /// the device-control interface interpret them unchanged.
    pub enum Status: u32 {
        Success => ("success", 0x0000_0000),
        Pending => ("pending", 0x0000_0103),
        InvalidRequest => ("invalid_request", 0xC000_0010),
        AccessDenied => ("access_denied", 0xC000_0022),
        BufferTooSmall => ("buffer_too_small", 0xC000_0023),
        DeviceNotReady => ("device_not_ready", 0xC000_00A3),
        UnsupportedOperation => ("unsupported_operation", 0xC000_00BB),
        AccessFault => ("access_fault", 0xC000_0185),
    }
    impl code -> u32
}

impl Status {
    pub fn from_code(code: u32) -> Option<Status> {
        Status::all().into_iter().find(|s| s.code() == code)
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }

    /// Status reported for a failed register access
    pub fn from_error(error: &RaplDrvError) -> Status {
        if !error.is_register_fault() {
            tracing::debug!("Access failed outside the register itself: {}", error);
        }
        Status::AccessFault
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<u32> = Status::all().iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Status::all().len());
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Status::from_code(0), Some(Status::Success));
        assert_eq!(Status::from_code(0xC000_0010), Some(Status::InvalidRequest));
        assert_eq!(Status::from_code(0xC000_00BB), Some(Status::UnsupportedOperation));
        assert_eq!(Status::from_code(0x1234), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Status::InvalidRequest.to_string(),
            "invalid_request (0xC0000010)"
        );
    }
}
