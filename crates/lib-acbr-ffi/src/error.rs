//! Error types for ACBrCEP FFI operations.

use lib_types::{ErrorRecord, ResultEnvelope, SessionState};
use std::path::PathBuf;
use thiserror::Error;

/// Code reported for input rejected before any native call.
pub const INVALID_INPUT_CODE: i32 = -1;

/// Code reported for failures raised on this side of the boundary
/// (bad arguments, wrong session state, panics).
pub const INTERNAL_ERROR_CODE: i32 = -999;

/// Errors that can occur while loading or driving the native library.
#[derive(Debug, Error)]
pub enum AcbrError {
    /// The running OS has no ACBrCEP build.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The resolved library file does not exist.
    #[error("Library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    /// Failed to open the shared library.
    #[error("Failed to load library '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// Required symbol not found in library.
    #[error("Symbol '{symbol}' not found in library")]
    SymbolNotFound { symbol: String },

    /// Input rejected locally; no native call was made.
    #[error("{0}")]
    InvalidInput(String),

    /// Argument cannot cross the boundary as a C string.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// CEP_Inicializar returned a negative code.
    #[error("CEP_Inicializar failed with code {code}: {message}")]
    NativeInit { code: i32, message: String },

    /// Any other entry point returned a negative code.
    #[error("{entry_point} failed with code {code}: {message}")]
    NativeCall {
        entry_point: &'static str,
        code: i32,
        message: String,
    },

    /// Optional entry point missing from this library build.
    #[error("Entry point '{0}' not exported by library")]
    NotExported(&'static str),

    /// Invalid session state for operation.
    #[error("Invalid session state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// The session was finalized and cannot be initialized again.
    #[error("Library session already finalized")]
    SessionFinalized,

    /// A call panicked inside the guarded section.
    #[error("Lookup panicked: {0}")]
    Panicked(String),
}

impl AcbrError {
    /// Create a load error.
    pub fn load_error(path: impl Into<String>, source: libloading::Error) -> Self {
        Self::LoadError {
            path: path.into(),
            source,
        }
    }

    /// Create a symbol not found error.
    pub fn symbol_not_found(symbol: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.into(),
        }
    }

    /// Create an init failed error.
    pub fn native_init(code: i32, message: impl Into<String>) -> Self {
        Self::NativeInit {
            code,
            message: message.into(),
        }
    }

    /// Create a failed call error.
    pub fn native_call(entry_point: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::NativeCall {
            entry_point,
            code,
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: SessionState, actual: SessionState) -> Self {
        Self::InvalidState { expected, actual }
    }

    /// The error returned for a CEP that does not normalize to eight digits.
    pub fn invalid_cep() -> Self {
        Self::InvalidInput("invalid CEP: must be 8 numeric digits".to_string())
    }

    /// Check if the library could not be opened or bound.
    pub fn is_bind_error(&self) -> bool {
        matches!(self, Self::LoadError { .. } | Self::SymbolNotFound { .. })
    }

    /// Check if no serving is possible after this error.
    pub fn is_fatal(&self) -> bool {
        self.is_bind_error()
            || matches!(
                self,
                Self::UnsupportedPlatform(_) | Self::LibraryNotFound(_)
            )
    }

    /// The status code surfaced to callers.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => INVALID_INPUT_CODE,
            Self::NativeInit { code, .. } | Self::NativeCall { code, .. } => *code,
            _ => INTERNAL_ERROR_CODE,
        }
    }
}

impl From<AcbrError> for ErrorRecord {
    fn from(err: AcbrError) -> Self {
        let code = err.code();
        let message = match err {
            AcbrError::NativeInit { message, .. } | AcbrError::NativeCall { message, .. } => message,
            AcbrError::InvalidInput(message) => message,
            other => other.to_string(),
        };
        ErrorRecord { code, message }
    }
}

impl<T> From<AcbrError> for ResultEnvelope<T> {
    fn from(err: AcbrError) -> Self {
        ErrorRecord::from(err).into()
    }
}

/// Result type for ACBrCEP operations.
pub type AcbrResult<T> = Result<T, AcbrError>;

/// Conversion from [`AcbrResult`] into the envelope handed to callers.
pub trait IntoEnvelope<T> {
    fn into_envelope(self) -> ResultEnvelope<T>;
}

impl<T> IntoEnvelope<T> for AcbrResult<T> {
    fn into_envelope(self) -> ResultEnvelope<T> {
        match self {
            Ok(data) => ResultEnvelope::success(data),
            Err(err) => err.into(),
        }
    }
}
