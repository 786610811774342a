//! # lib-acbr-ffi
//!
//! Safe FFI wrapper for the ACBrCEP postal-code library.
//!
//! This crate drives the vendor-supplied ACBrCEP binary (`.dll`/`.so`).
//! It handles:
//!
//! - Resolving the build for the running platform
//! - Dynamic library loading with `libloading`
//! - The Initialize → search → Finalize lifecycle
//! - Output-buffer marshaling and last-error retrieval
//! - Serialized access to the process-wide session
//!
//! # Safety
//!
//! The library keeps global state and is not reentrant. This crate:
//!
//! 1. **State machine**: Session states prevent invalid call sequences
//! 2. **Serialization**: One mutex guards every call sequence
//! 3. **Scoped buffers**: Each output buffer lives for exactly one call
//! 4. **Panic catching**: `catch_unwind` turns panics into failures
//!
//! No call has an internal timeout; callers wrap the guarded sequence.

pub mod error;
pub mod last_error;
pub mod lifecycle;
pub mod loader;
pub mod marshal;
pub mod platform;
pub mod search;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{AcbrError, AcbrResult, IntoEnvelope};
pub use lifecycle::AcbrSession;
pub use loader::{AcbrLibrary, NativeApi};
pub use platform::Platform;
pub use search::{CepService, SessionStatus};
