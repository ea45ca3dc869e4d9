//! Value codec for payloads exchanged with the backend.
//!
//! Numbers and booleans cross the wire unmodified. Everything else travels
//! inside one discriminated envelope, `{"compressed": bool, "payload": …}`,
//! used identically on both the encode and decode paths:
//!
//! - With compression on, the value's text form is gzipped and every byte is
//!   shifted up by one into a one-code-point-per-byte string, keeping the
//!   NUL code point out of the transport representation.
//! - With compression off, the payload is the raw value.
//!
//! Decoding is best-effort and never fails a read: non-envelope values pass
//! through, a malformed compressed payload comes back as its raw text, and
//! decompressed text that is not valid JSON is returned as a plain string.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use crate::config::CompressionMode;

/// Encodes and decodes values crossing the backend boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec {
    mode: CompressionMode,
}

impl ValueCodec {
    /// Create a codec with the given compression mode.
    pub fn new(mode: CompressionMode) -> Self {
        Self { mode }
    }

    /// Encode a value into its wire form.
    ///
    /// Numbers and booleans are returned unwrapped. Strings are compressed
    /// verbatim; other values are serialized to JSON text first. If the
    /// compressor fails the value falls back to the uncompressed envelope.
    pub fn encode(&self, value: &Value) -> Value {
        if value.is_number() || value.is_boolean() {
            return value.clone();
        }

        let level = match self.mode {
            CompressionMode::Off => {
                return json!({ "compressed": false, "payload": value });
            }
            CompressionMode::Gzip { level } => level.min(9),
        };

        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };

        match gzip_bytes(text.as_bytes(), level) {
            Some(bytes) => json!({ "compressed": true, "payload": shift_encode(&bytes) }),
            None => json!({ "compressed": false, "payload": value }),
        }
    }

    /// Decode a wire form back into a value. Best-effort: malformed input
    /// degrades to raw text instead of failing the read.
    pub fn decode(&self, wire: &Value) -> Value {
        if wire.is_number() || wire.is_boolean() {
            return wire.clone();
        }

        let Some(envelope) = wire.as_object() else {
            return wire.clone();
        };
        let Some(compressed) = envelope.get("compressed").and_then(Value::as_bool) else {
            return wire.clone();
        };
        let Some(payload) = envelope.get("payload") else {
            return Value::Null;
        };

        if !compressed {
            return payload.clone();
        }
        let Some(text) = payload.as_str() else {
            return payload.clone();
        };
        let Some(bytes) = shift_decode(text) else {
            return Value::String(text.to_string());
        };
        match gunzip_string(&bytes) {
            Some(plain) => serde_json::from_str(&plain).unwrap_or(Value::String(plain)),
            None => Value::String(text.to_string()),
        }
    }
}

fn gzip_bytes(data: &[u8], level: u32) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

fn gunzip_string(data: &[u8]) -> Option<String> {
    let mut decoder = GzDecoder::new(data);
    let mut plain = String::new();
    decoder.read_to_string(&mut plain).ok()?;
    Some(plain)
}

/// Map every compressed byte to the code point one above it. Byte values
/// 0..=255 land on code points 1..=256, all of which are valid chars.
fn shift_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| char::from_u32(u32::from(byte) + 1).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Reverse the byte shift. `None` when the text contains code points outside
/// the shifted range.
fn shift_decode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|ch| {
            let code = (ch as u32).checked_sub(1)?;
            u8::try_from(code).ok()
        })
        .collect()
}
