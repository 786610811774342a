//! Tagged success/failure wrapper returned by every lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a lookup operation.
///
/// Serialized as `{"status":"success","data":...}` or
/// `{"status":"failure","code":-5,"message":"..."}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultEnvelope<T> {
    /// The operation completed and produced `data`.
    Success { data: T },

    /// The operation failed with a status code and diagnostic text.
    Failure { code: i32, message: String },
}

impl<T> ResultEnvelope<T> {
    /// Wrap a successful payload.
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Build a failure.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    /// Check if this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Borrow the payload of a success.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Convert into a standard `Result`.
    pub fn into_result(self) -> Result<T, ErrorRecord> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { code, message } => Err(ErrorRecord { code, message }),
        }
    }
}

impl<T> From<ErrorRecord> for ResultEnvelope<T> {
    fn from(record: ErrorRecord) -> Self {
        Self::Failure {
            code: record.code,
            message: record.message,
        }
    }
}

/// A failure's code and message, detached from any payload type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ErrorRecord {}
