//! Output-buffer marshaling for ACBrCEP entry points.
//!
//! Every text-returning entry point takes a caller-owned `char*` buffer and
//! an `int*` length cell. The cell holds the capacity on entry; the library
//! may overwrite it with the response length. A [`CallBuffer`] is allocated
//! for exactly one call and dropped when the call's text has been copied out.

use serde_json::Value;
use std::ffi::{c_char, c_int};

/// Capacity for name and version queries.
pub const NAME_BUFFER_SIZE: usize = 1024;

/// Capacity for search responses and last-error text.
pub const SEARCH_BUFFER_SIZE: usize = 16 * 1024;

/// Capacity for exported configuration.
pub const CONFIG_BUFFER_SIZE: usize = 50 * 1024;

/// Fixed-capacity output region plus its companion length cell.
#[derive(Debug)]
pub struct CallBuffer {
    bytes: Vec<u8>,
    length: c_int,
}

impl CallBuffer {
    /// Allocate a zeroed buffer whose length cell starts at `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(c_int::MAX as usize);
        Self {
            bytes: vec![0; capacity],
            length: capacity as c_int,
        }
    }

    /// Declared capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Raw buffer and length-cell pointers for a foreign call.
    ///
    /// Both stay valid until the next use of `self`; the callee must not
    /// retain them past the call's return.
    pub fn as_raw_parts(&mut self) -> (*mut c_char, *mut c_int) {
        (self.bytes.as_mut_ptr().cast::<c_char>(), &mut self.length as *mut c_int)
    }

    /// Writable view of the buffer, for in-process implementations.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Length currently held by the length cell.
    pub fn reported_len(&self) -> c_int {
        self.length
    }

    /// Overwrite the length cell.
    pub fn set_reported_len(&mut self, length: c_int) {
        self.length = length;
    }

    /// Bytes of the response.
    ///
    /// A reported length within `1..=capacity` bounds the region; anything
    /// else (unset, negative, or a truncation hint larger than the buffer)
    /// falls back to the full capacity. The region is then cut at the first
    /// NUL byte.
    pub fn used(&self) -> &[u8] {
        let capacity = self.capacity();
        let bound = match usize::try_from(self.length) {
            Ok(len) if len > 0 && len <= capacity => len,
            _ => {
                if self.length > 0 {
                    tracing::debug!(
                        reported = self.length,
                        capacity,
                        "Response truncated to buffer capacity"
                    );
                }
                capacity
            }
        };
        let region = &self.bytes[..bound];
        let end = region.iter().position(|&b| b == 0).unwrap_or(bound);
        &region[..end]
    }

    /// Decode the response as trimmed UTF-8 text, consuming the buffer.
    ///
    /// Invalid sequences are replaced rather than rejected.
    pub fn into_text(self) -> String {
        let text = String::from_utf8_lossy(self.used());
        text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    }
}

/// Allocate a buffer of `capacity`, run `invoke` against it, and return the
/// status code with the decoded text.
///
/// The buffer never outlives this call.
pub fn call_with_buffer<F>(capacity: usize, invoke: F) -> (c_int, String)
where
    F: FnOnce(&mut CallBuffer) -> c_int,
{
    let mut buffer = CallBuffer::with_capacity(capacity);
    let code = invoke(&mut buffer);
    (code, buffer.into_text())
}

/// Interpret response text as JSON, falling back to the raw text.
///
/// The native library does not guarantee well-formed JSON on every path, so
/// a parse failure is not an error.
pub fn decode_payload(text: String) -> Value {
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, len = text.len(), "Response is not JSON, keeping raw text");
            Value::String(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fill(buffer: &mut CallBuffer, text: &[u8]) {
        buffer.as_mut_slice()[..text.len()].copy_from_slice(text);
    }

    #[test]
    fn test_new_buffer_reports_capacity() {
        let buffer = CallBuffer::with_capacity(NAME_BUFFER_SIZE);
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.reported_len(), 1024);
        assert!(buffer.used().is_empty());
    }

    #[test]
    fn test_reported_length_bounds_region() {
        let mut buffer = CallBuffer::with_capacity(32);
        fill(&mut buffer, b"ACBrLibCEPgarbage");
        buffer.set_reported_len(10);
        assert_eq!(buffer.into_text(), "ACBrLibCEP");
    }

    #[test]
    fn test_scan_for_terminator_without_length() {
        let mut buffer = CallBuffer::with_capacity(32);
        fill(&mut buffer, b"1.0.0.1\0stale bytes");
        assert_eq!(buffer.into_text(), "1.0.0.1");
    }

    #[test]
    fn test_invalid_reported_length_falls_back_to_scan() {
        let mut buffer = CallBuffer::with_capacity(8);
        fill(&mut buffer, b"abcdefgh");
        buffer.set_reported_len(4096);
        assert_eq!(buffer.used(), b"abcdefgh");

        let mut buffer = CallBuffer::with_capacity(8);
        fill(&mut buffer, b"abc\0");
        buffer.set_reported_len(-1);
        assert_eq!(buffer.used(), b"abc");
    }

    #[test]
    fn test_text_is_trimmed() {
        let mut buffer = CallBuffer::with_capacity(32);
        fill(&mut buffer, b"  \r\nnot found\r\n ");
        assert_eq!(buffer.into_text(), "not found");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = CallBuffer::with_capacity(8);
        fill(&mut buffer, &[b'S', 0xE3, b'o']);
        assert_eq!(buffer.into_text(), "S\u{FFFD}o");
    }

    #[test]
    fn test_call_with_buffer_passes_capacity() {
        let (code, text) = call_with_buffer(SEARCH_BUFFER_SIZE, |buffer| {
            assert_eq!(buffer.reported_len() as usize, SEARCH_BUFFER_SIZE);
            fill(buffer, b"{}");
            buffer.set_reported_len(2);
            0
        });
        assert_eq!(code, 0);
        assert_eq!(text, "{}");
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(
            decode_payload(r#"{"Logradouro":"X","Bairro":"Y"}"#.to_string()),
            json!({"Logradouro": "X", "Bairro": "Y"})
        );
        assert_eq!(
            decode_payload("[CEP]\nQuantidade=1".to_string()),
            json!("[CEP]\nQuantidade=1")
        );
        assert_eq!(decode_payload(String::new()), json!(""));
    }
}
