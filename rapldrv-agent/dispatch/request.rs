use rapldrv_raw::ControlCode;

use super::status::Status;

/// Wire size of a register number in the input buffer
pub const REGISTER_NUMBER_SIZE: usize = 4;

/// Wire size of a register value in the result
pub const REGISTER_VALUE_SIZE: usize = 8;

/// Status, reported length and result bytes written back by the dispatcher
///
/// The result bytes start zeroed and are written only together with
/// `Status::Success`, so a failed request never carries stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    status: Status,
    information: u32,
    output: [u8; REGISTER_VALUE_SIZE],
}

impl Completion {
    fn pending() -> Self {
        Self {
            status: Status::Pending,
            information: 0,
            output: [0; REGISTER_VALUE_SIZE],
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Number of valid bytes in `output()`
    pub fn information(&self) -> u32 {
        self.information
    }

    /// Valid result bytes; empty unless the request succeeded
    pub fn output(&self) -> &[u8] {
        &self.output[..self.information as usize]
    }

    /// Raw result buffer, including bytes that were never reported
    pub fn raw_output(&self) -> &[u8; REGISTER_VALUE_SIZE] {
        &self.output
    }
}

/// One unit of work handed to the dispatcher
///
/// Built by the transport per inbound call, consumed by value by
/// `Dispatcher::handle`, and returned with its completion filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    control_code: ControlCode,
    input: Vec<u8>,
    output_length: u32,
    completion: Completion,
}

impl Request {
    /// A request whose output capacity fits one register value
    pub fn new(control_code: u32, input: impl Into<Vec<u8>>) -> Self {
        Self::with_output_length(control_code, input, REGISTER_VALUE_SIZE as u32)
    }

    pub fn with_output_length(
        control_code: u32,
        input: impl Into<Vec<u8>>,
        output_length: u32,
    ) -> Self {
        Self {
            control_code: ControlCode(control_code),
            input: input.into(),
            output_length,
            completion: Completion::pending(),
        }
    }

    /// Buffered read of `register`, encoded little-endian
    pub fn read_register(control_code: u32, register: u32) -> Self {
        Self::new(control_code, register.to_le_bytes())
    }

    pub fn control_code(&self) -> ControlCode {
        self.control_code
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn input_length(&self) -> u32 {
        self.input.len() as u32
    }

    pub fn output_length(&self) -> u32 {
        self.output_length
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn status(&self) -> Status {
        self.completion.status
    }

    /// The register number carried in the input buffer, if the buffer is
    /// exactly one register number wide
    pub fn register_number(&self) -> Option<u32> {
        let bytes: [u8; REGISTER_NUMBER_SIZE] = self.input.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// The returned register value, if the request succeeded
    pub fn value(&self) -> Option<u64> {
        self.completion
            .status
            .is_success()
            .then(|| u64::from_le_bytes(self.completion.output))
    }

    pub(crate) fn complete(&mut self, value: u64) {
        self.completion.output = value.to_le_bytes();
        self.completion.information = REGISTER_VALUE_SIZE as u32;
        self.completion.status = Status::Success;
    }

    pub(crate) fn fail(&mut self, status: Status) {
        debug_assert!(!status.is_success());
        self.completion.information = 0;
        self.completion.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_number_is_little_endian() {
        let req = Request::new(0, vec![0x11, 0x06, 0x00, 0x00]);
        assert_eq!(req.register_number(), Some(0x611));
        assert_eq!(Request::read_register(0, 0x639).register_number(), Some(0x639));
    }

    #[test]
    fn test_register_number_requires_exact_width() {
        assert_eq!(Request::new(0, vec![1, 0]).register_number(), None);
        assert_eq!(Request::new(0, vec![1, 0, 0, 0, 0]).register_number(), None);
        assert_eq!(Request::new(0, Vec::new()).register_number(), None);
    }

    #[test]
    fn test_new_request_is_pending_and_zeroed() {
        let req = Request::read_register(0, 1);
        assert_eq!(req.status(), Status::Pending);
        assert_eq!(req.value(), None);
        assert_eq!(req.completion().raw_output(), &[0u8; 8]);
        assert!(req.completion().output().is_empty());
    }

    #[test]
    fn test_complete_and_fail() {
        let mut req = Request::read_register(0, 1);
        req.complete(0x0102_0304_0506_0708);
        assert_eq!(req.value(), Some(0x0102_0304_0506_0708));
        assert_eq!(req.completion().output(), &[8, 7, 6, 5, 4, 3, 2, 1]);

        let mut req = Request::read_register(0, 1);
        req.fail(Status::InvalidRequest);
        assert_eq!(req.value(), None);
        assert_eq!(req.completion().information(), 0);
        assert_eq!(req.completion().raw_output(), &[0u8; 8]);
    }
}
