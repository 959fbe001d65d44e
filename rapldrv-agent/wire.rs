//! Socket framing of requests and completions
//!
//! All integers are little-endian.
//!
//! Request frame:
//!
//! | Field          | Size             |
//! |----------------|------------------|
//! | control_code   | 4                |
//! | output_length  | 4                |
//! | input_length   | 4                |
//! | input          | input_length     |
//!
//! Response frame:
//!
//! | Field          | Size             |
//! |----------------|------------------|
//! | status         | 4                |
//! | information    | 4                |
//! | output         | information      |

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dispatch::{Request, Status, REGISTER_VALUE_SIZE};
use crate::error::{RaplDrvError, Result};

/// Largest input payload accepted on the wire
pub const MAX_INPUT_LENGTH: u32 = 4096;

/// A completion as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u32,
    pub output: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> Option<Status> {
        Status::from_code(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success.code()
    }

    /// The register value of a successful response
    pub fn value(&self) -> Option<u64> {
        if !self.is_success() {
            return None;
        }
        let bytes: [u8; REGISTER_VALUE_SIZE] = self.output.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

/// Read the next request frame; `None` when the peer closed between frames
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    let control_code = match reader.read_u32_le().await {
        Ok(code) => code,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let output_length = reader.read_u32_le().await?;
    let input_length = reader.read_u32_le().await?;

    if input_length > MAX_INPUT_LENGTH {
        return Err(RaplDrvError::ProtocolError(format!(
            "input length {input_length} exceeds the {MAX_INPUT_LENGTH} byte limit"
        )));
    }

    let mut input = vec![0u8; input_length as usize];
    reader.read_exact(&mut input).await?;

    Ok(Some(Request::with_output_length(
        control_code,
        input,
        output_length,
    )))
}

pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, req: &Request) -> Result<()> {
    let mut frame = Vec::with_capacity(12 + req.input().len());
    frame.extend_from_slice(&req.control_code().raw().to_le_bytes());
    frame.extend_from_slice(&req.output_length().to_le_bytes());
    frame.extend_from_slice(&req.input_length().to_le_bytes());
    frame.extend_from_slice(req.input());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the completion of a handled request
pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, req: &Request) -> Result<()> {
    let completion = req.completion();
    let output = completion.output();

    let mut frame = Vec::with_capacity(8 + output.len());
    frame.extend_from_slice(&completion.status().code().to_le_bytes());
    frame.extend_from_slice(&(output.len() as u32).to_le_bytes());
    frame.extend_from_slice(output);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Response> {
    let status = reader.read_u32_le().await?;
    let information = reader.read_u32_le().await?;

    if information as usize > REGISTER_VALUE_SIZE {
        return Err(RaplDrvError::ProtocolError(format!(
            "response carries {information} bytes, expected at most {REGISTER_VALUE_SIZE}"
        )));
    }

    let mut output = vec![0u8; information as usize];
    reader.read_exact(&mut output).await?;

    Ok(Response { status, output })
}
