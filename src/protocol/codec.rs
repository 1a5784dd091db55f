//! Protocol codec
//!
//! Encoding and decoding functions for the host protocol framing.
//!
//! ## Wire Format
//!
//! ### Request
//! ```text
//! ┌──────────────────┬─────────────────────────────┐
//! │ Len (4 hex chars)│      Command (ASCII)        │
//! └──────────────────┴─────────────────────────────┘
//! ```
//!
//! ### Response
//! ```text
//! ┌──────────┬──────────────────┬──────────────────┐
//! │ OKAY (4) │                  │                  │
//! ├──────────┼──────────────────┼──────────────────┤
//! │ FAIL (4) │ Len (4 hex chars)│ Message (UTF-8)  │
//! └──────────┴──────────────────┴──────────────────┘
//! ```

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AdbError, Result};
use super::{Command, StatusToken, MAX_COMMAND_LEN};

/// Size of the hex length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of a status token
pub const STATUS_SIZE: usize = 4;

// =============================================================================
// Pure Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: 4 lowercase hex digits + command text
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    if command.len() > MAX_COMMAND_LEN {
        return Err(AdbError::InvalidRequest(format!(
            "command of {} bytes exceeds the {} byte length prefix limit",
            command.len(),
            MAX_COMMAND_LEN
        )));
    }

    let mut message = Vec::with_capacity(LENGTH_PREFIX_SIZE + command.len());
    message.extend_from_slice(format!("{:04x}", command.len()).as_bytes());
    message.extend_from_slice(command.as_str().as_bytes());
    Ok(message)
}

/// Decode a 4-hex-digit length prefix
pub fn decode_length(prefix: &[u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let text = std::str::from_utf8(prefix)
        .map_err(|_| AdbError::protocol(format!("length prefix is not ASCII: {:02x?}", prefix)))?;

    usize::from_str_radix(text, 16)
        .map_err(|_| AdbError::protocol(format!("length prefix is not hex: {:?}", text)))
}

/// Classify a status token
///
/// Returns `true` for `OKAY`, `false` for `FAIL`; anything else is fatal.
pub fn decode_status(token: &[u8; STATUS_SIZE]) -> Result<bool> {
    match token {
        t if t == StatusToken::OKAY => Ok(true),
        t if t == StatusToken::FAIL => Ok(false),
        other => Err(AdbError::protocol(format!(
            "expected OKAY or FAIL, got {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn decode_message(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(message) => message,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

// =============================================================================
// Blocking I/O helpers
// =============================================================================

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    tracing::trace!("Sent command {:?}", command.as_str());
    Ok(())
}

/// Read a status token, including the failure message on `FAIL`
pub fn read_status<R: Read>(reader: &mut R) -> Result<StatusToken> {
    let mut token = [0u8; STATUS_SIZE];
    reader.read_exact(&mut token)?;

    if decode_status(&token)? {
        return Ok(StatusToken::Okay);
    }

    let message = read_length_prefixed(reader)?;
    Ok(StatusToken::Fail(decode_message(message)))
}

/// Read a 4-hex-digit length prefix followed by exactly that many bytes
pub fn read_length_prefixed<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let len = decode_length(&prefix)?;

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload)?;
    }
    Ok(payload)
}

/// Read a length-prefixed UTF-8 string (e.g. the reply to `host:version`)
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    read_length_prefixed(reader).map(decode_message)
}

// =============================================================================
// Suspendable I/O helpers
// =============================================================================

/// Write a command to an async stream
pub async fn write_command_async<W: AsyncWrite + Unpin>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    tracing::trace!("Sent command {:?}", command.as_str());
    Ok(())
}

/// Read a status token from an async stream
pub async fn read_status_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<StatusToken> {
    let mut token = [0u8; STATUS_SIZE];
    reader.read_exact(&mut token).await?;

    if decode_status(&token)? {
        return Ok(StatusToken::Okay);
    }

    let message = read_length_prefixed_async(reader).await?;
    Ok(StatusToken::Fail(decode_message(message)))
}

/// Read a length-prefixed payload from an async stream
pub async fn read_length_prefixed_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = decode_length(&prefix)?;

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok(payload)
}

/// Read a length-prefixed UTF-8 string from an async stream
pub async fn read_string_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    read_length_prefixed_async(reader).await.map(decode_message)
}
