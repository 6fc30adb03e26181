//! # JSON Serialization Module
//!
//! Request bodies are decoded with simd-json; responses are serialized with
//! serde_json, optionally escaping every non-ASCII character.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Write;

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch buffer.
///
/// # Errors
///
/// Returns `Error::MalformedRequest` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut scratch = bytes.to_vec();

    simd_json::serde::from_slice(&mut scratch)
        .map_err(|e| Error::malformed(format!("JSON parse error: {e}")))
}

/// Serialize a value to JSON bytes
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Serialize a value to JSON with every non-ASCII character written as `\uXXXX`
///
/// Characters outside the BMP become UTF-16 surrogate pairs.
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json_ascii<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_string(value)?;
    Ok(escape_non_ascii(&json).into_bytes())
}

fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    out
}
