//! Service configuration loading and validation.

use anyhow::{Context, Result};
use lib_acbr_ffi::platform::DEFAULT_LIB_DIR;
use lib_types::{ConfigReference, DEFAULT_INI_FILE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Native library configuration.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Request handling.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the native library and its INI file live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory holding `windows/ACBrCEP64.dll` and `linux/libacbrcep64.so`.
    #[serde(default = "default_lib_dir")]
    pub lib_dir: PathBuf,

    /// ACBrLib INI file handed to `CEP_Inicializar`. Never parsed here.
    #[serde(default = "default_ini_path")]
    pub ini_path: PathBuf,

    /// Key used by the library to decrypt protected INI values.
    #[serde(default)]
    pub crypt_key: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            lib_dir: default_lib_dir(),
            ini_path: default_ini_path(),
            crypt_key: String::new(),
        }
    }
}

/// Request handling parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound on one guarded lookup, including time spent queued.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Initialize the library at startup instead of on the first request.
    #[serde(default = "default_true")]
    pub eager_initialize: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            eager_initialize: true,
        }
    }
}

fn default_bind() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 3000)) }
fn default_lib_dir() -> PathBuf { PathBuf::from(DEFAULT_LIB_DIR) }
fn default_ini_path() -> PathBuf { PathBuf::from(DEFAULT_INI_FILE) }
fn default_request_timeout() -> u64 { 30 }
fn default_true() -> bool { true }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            library: LibraryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Timeout applied around each guarded lookup.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// INI path (made absolute against the working directory) and crypt key.
    pub fn config_reference(&self) -> ConfigReference {
        let ini_path = &self.library.ini_path;
        let ini_path = if ini_path.is_absolute() {
            ini_path.clone()
        } else {
            std::env::current_dir()
                .map(|dir| dir.join(ini_path))
                .unwrap_or_else(|_| ini_path.clone())
        };
        ConfigReference::new(ini_path, self.library.crypt_key.clone())
    }
}

/// Load configuration from a file.
///
/// The result is not validated; call [`validate_config`] once command-line
/// overrides have been applied.
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: ServiceConfig = if path.extension().map_or(false, |e| e == "json") {
        serde_json::from_str(&content)
            .with_context(|| "Failed to parse config as JSON")?
    } else {
        // Assume TOML
        toml::from_str(&content)
            .with_context(|| "Failed to parse config as TOML")?
    };

    Ok(config)
}

/// Validate configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("request_timeout_secs must be greater than zero");
    }

    if config.library.lib_dir.as_os_str().is_empty() {
        anyhow::bail!("library.lib_dir must not be empty");
    }

    // Both strings cross the FFI boundary as C strings
    if config.library.crypt_key.contains('\0') {
        anyhow::bail!("library.crypt_key must not contain NUL bytes");
    }
    if config.library.ini_path.to_string_lossy().contains('\0') {
        anyhow::bail!("library.ini_path must not contain NUL bytes");
    }

    if !config.library.ini_path.exists() {
        tracing::warn!(
            path = ?config.library.ini_path,
            "ACBrLib INI file not found; the library will create or reject it"
        );
    }

    Ok(())
}
