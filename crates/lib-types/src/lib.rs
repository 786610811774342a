//! # lib-types
//!
//! Core type definitions for ACBrCEP postal-code lookups.
//!
//! This crate provides the plain data shared throughout the workspace:
//! - Postal codes and address queries
//! - The success/failure envelope returned by every lookup
//! - Session state and configuration handed to the native library

pub mod cep;
pub mod envelope;
pub mod session;

pub use cep::*;
pub use envelope::*;
pub use session::*;
