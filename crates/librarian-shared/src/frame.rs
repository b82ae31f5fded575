//! Newline-delimited JSON framing.
//!
//! A frame is one JSON object followed by `\n`. Embedded newlines cannot
//! occur because `serde_json::to_string` never emits raw newlines.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a message as a single line, terminator included.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (with or without its terminator).
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Parse one raw line as read off the wire.
pub fn decode_bytes<T: DeserializeOwned>(line: &[u8]) -> Result<T, ProtocolError> {
    decode(std::str::from_utf8(line)?)
}
