//! Native session state and the configuration handed to the library.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default ACBrLib INI file name, resolved against the working directory.
pub const DEFAULT_INI_FILE: &str = "ACBrLib.ini";

/// Lifecycle state of the process-wide native library session.
///
/// `Initialized` is only reachable from `Loaded`, and nothing leads back
/// out of `Finalized` within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Library not opened yet.
    Unloaded,
    /// Library opened and every required entry point bound.
    Loaded,
    /// `CEP_Inicializar` succeeded.
    Initialized,
    /// `CEP_Finalizar` succeeded.
    Finalized,
}

/// Configuration file path and crypt key passed to `CEP_Inicializar`.
///
/// The INI file is opaque here: only its path is forwarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigReference {
    config_path: PathBuf,
    crypt_key: String,
}

impl ConfigReference {
    pub fn new(config_path: impl Into<PathBuf>, crypt_key: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            crypt_key: crypt_key.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn crypt_key(&self) -> &str {
        &self.crypt_key
    }
}

impl Default for ConfigReference {
    fn default() -> Self {
        let config_path = std::env::current_dir()
            .map(|dir| dir.join(DEFAULT_INI_FILE))
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_INI_FILE));
        Self::new(config_path, "")
    }
}

/// Library identification captured right after initialization.
///
/// Either field is `None` when its diagnostic query failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_reference() {
        let reference = ConfigReference::default();
        assert!(reference.config_path().ends_with(DEFAULT_INI_FILE));
        assert_eq!(reference.crypt_key(), "");
    }

    #[test]
    fn test_session_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionState::Initialized).unwrap(),
            "\"initialized\""
        );
    }
}
