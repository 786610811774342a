//! Retrieval of the library's last-error text.

use crate::loader::NativeApi;
use crate::marshal::{call_with_buffer, SEARCH_BUFFER_SIZE};

/// Fetch the text of the library's last return via `CEP_UltimoRetorno`.
///
/// Only meaningful right after an entry point returned a negative code.
/// Yields an empty string if the query itself fails.
pub fn retrieve<N: NativeApi + ?Sized>(native: &N) -> String {
    let (code, text) = call_with_buffer(SEARCH_BUFFER_SIZE, |buffer| native.last_return(buffer));
    if code < 0 {
        tracing::debug!(code, "CEP_UltimoRetorno failed");
        return String::new();
    }
    text
}

/// Message to report alongside a failing `code`.
///
/// Falls back to a generic message when no diagnostic text is available.
pub fn message_for<N: NativeApi + ?Sized>(native: &N, code: i32) -> String {
    let message = retrieve(native);
    if message.is_empty() {
        format!("unknown error (code {code})")
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNative;

    #[test]
    fn test_retrieve_last_error() {
        let native = MockNative::new().with_last_error("CEP nao encontrado");
        assert_eq!(retrieve(&native), "CEP nao encontrado");
        assert_eq!(native.calls("CEP_UltimoRetorno"), 1);
    }

    #[test]
    fn test_failed_retrieval_yields_empty() {
        let native = MockNative::new()
            .with_last_error("stale")
            .with_last_return_code(-1);
        assert_eq!(retrieve(&native), "");
    }

    #[test]
    fn test_generic_message_when_empty() {
        let native = MockNative::new();
        assert_eq!(message_for(&native, -7), "unknown error (code -7)");
    }
}
