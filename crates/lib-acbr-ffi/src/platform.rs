//! Resolution of the ACBrCEP binary for the running platform.

use crate::error::{AcbrError, AcbrResult};
use std::path::{Path, PathBuf};

/// Default library directory, relative to the working directory.
pub const DEFAULT_LIB_DIR: &str = "lib";

/// Platforms with an ACBrCEP build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// 64-bit Windows DLL.
    Windows,
    /// 64-bit Linux shared object.
    Linux,
}

impl Platform {
    /// Detect the running platform.
    pub fn current() -> AcbrResult<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map an OS identifier (as in `std::env::consts::OS`) to a platform.
    pub fn from_os(os: &str) -> AcbrResult<Self> {
        match os {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            other => Err(AcbrError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// Subdirectory of the library directory holding this platform's build.
    pub fn subdirectory(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
        }
    }

    /// File name of this platform's build.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Windows => "ACBrCEP64.dll",
            Self::Linux => "libacbrcep64.so",
        }
    }

    /// Path of the build relative to the library directory.
    pub fn relative_path(self) -> PathBuf {
        Path::new(self.subdirectory()).join(self.file_name())
    }
}

/// Resolve the library path for the running platform under `base_dir`.
pub fn resolve_library_path(base_dir: &Path) -> AcbrResult<PathBuf> {
    resolve_for(Platform::current()?, base_dir)
}

/// Resolve the library path for `platform` under `base_dir`.
///
/// Fails with [`AcbrError::LibraryNotFound`] if the file does not exist.
pub fn resolve_for(platform: Platform, base_dir: &Path) -> AcbrResult<PathBuf> {
    let path = base_dir.join(platform.relative_path());
    if !path.is_file() {
        return Err(AcbrError::LibraryNotFound(path));
    }

    let path = path.canonicalize().unwrap_or(path);
    tracing::debug!(?platform, path = %path.display(), "Resolved ACBrCEP library");
    Ok(path)
}
