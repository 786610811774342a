//! ACBrCEP session lifecycle management.
//!
//! The native library keeps process-wide global state, so a single
//! [`AcbrSession`] owns the library handle and drives it through
//! `Unloaded → Loaded → Initialized → Finalized`. Nothing leads back out of
//! `Finalized`: the library is not assumed to survive a second
//! initialize after finalize.
//!
//! The session takes `&mut self` for every transition. Sharing it across
//! threads requires a `Mutex`, see [`crate::search::CepService`].

use crate::error::{AcbrError, AcbrResult};
use crate::last_error;
use crate::loader::{AcbrLibrary, NativeApi, CEP_FINALIZAR};
use crate::marshal::{call_with_buffer, NAME_BUFFER_SIZE};
use crate::platform;
use lib_types::{ConfigReference, LibraryInfo, SessionState};
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Opens the native library on first use.
pub type Loader<N> = Box<dyn FnMut() -> AcbrResult<N> + Send>;

/// The single owner of the native library handle.
pub struct AcbrSession<N: NativeApi = AcbrLibrary> {
    loader: Loader<N>,
    native: Option<N>,
    state: SessionState,
    config: ConfigReference,
    info: LibraryInfo,
}

impl AcbrSession<AcbrLibrary> {
    /// Resolve the platform build under `lib_dir` without opening it yet.
    ///
    /// Fails if the platform is unsupported or the file is missing.
    pub fn open(lib_dir: &Path, config: ConfigReference) -> AcbrResult<Self> {
        let path = platform::resolve_library_path(lib_dir)?;
        Ok(Self::from_library_path(path, config))
    }

    /// Session over the library at `path`, bound lazily.
    pub fn from_library_path(path: impl Into<PathBuf>, config: ConfigReference) -> Self {
        let path = path.into();
        Self::with_loader(move || AcbrLibrary::load(&path), config)
    }
}

impl<N: NativeApi> AcbrSession<N> {
    /// Create an `Unloaded` session that binds through `loader`.
    pub fn with_loader<F>(loader: F, config: ConfigReference) -> Self
    where
        F: FnMut() -> AcbrResult<N> + Send + 'static,
    {
        Self {
            loader: Box::new(loader),
            native: None,
            state: SessionState::Unloaded,
            config,
            info: LibraryInfo::default(),
        }
    }

    /// Create a `Loaded` session over an already bound library.
    pub fn with_native(native: N, config: ConfigReference) -> Self {
        Self {
            loader: Box::new(|| -> AcbrResult<N> {
                Err(AcbrError::invalid_state(SessionState::Unloaded, SessionState::Loaded))
            }),
            native: Some(native),
            state: SessionState::Loaded,
            config,
            info: LibraryInfo::default(),
        }
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration handed to `CEP_Inicializar`.
    pub fn config(&self) -> &ConfigReference {
        &self.config
    }

    /// Name and version captured by the last successful initialize.
    pub fn library_info(&self) -> &LibraryInfo {
        &self.info
    }

    /// Open and bind the library. A no-op once bound.
    pub fn load(&mut self) -> AcbrResult<()> {
        match self.state {
            SessionState::Unloaded => {
                let native = (self.loader)()?;
                self.native = Some(native);
                self.state = SessionState::Loaded;
                Ok(())
            }
            SessionState::Finalized => Err(AcbrError::SessionFinalized),
            SessionState::Loaded | SessionState::Initialized => Ok(()),
        }
    }

    /// Initialize the native library with the session's configuration.
    ///
    /// Binds the library first if needed. Returns immediately while already
    /// `Initialized`. A negative code leaves the session `Loaded` so the call
    /// can be retried.
    pub fn initialize(&mut self) -> AcbrResult<()> {
        match self.state {
            SessionState::Initialized => return Ok(()),
            SessionState::Finalized => return Err(AcbrError::SessionFinalized),
            SessionState::Unloaded => self.load()?,
            SessionState::Loaded => {}
        }

        let config_path = c_string("config_path", &self.config.config_path().to_string_lossy())?;
        let crypt_key = c_string("crypt_key", self.config.crypt_key())?;
        let native = self.native()?;

        tracing::info!(
            config = %self.config.config_path().display(),
            config_exists = self.config.config_path().exists(),
            "Initializing ACBrCEP"
        );

        let code = native.initialize(&config_path, &crypt_key);
        tracing::debug!(code, "CEP_Inicializar returned");

        if code < 0 {
            let message = last_error::message_for(native, code);
            tracing::warn!(code, %message, "CEP_Inicializar failed");
            return Err(AcbrError::native_init(code, message));
        }

        let info = query_library_info(native);
        tracing::info!(
            name = info.name.as_deref().unwrap_or("?"),
            version = info.version.as_deref().unwrap_or("?"),
            "ACBrCEP initialized"
        );

        self.info = info;
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Finalize the native library.
    ///
    /// A no-op unless `Initialized`. On a negative code the session stays
    /// `Initialized`, so the call can be retried. On success the library
    /// handle is released.
    pub fn finalize(&mut self) -> AcbrResult<()> {
        if self.state != SessionState::Initialized {
            return Ok(());
        }

        let native = self.native()?;
        let code = native.finalize();
        tracing::debug!(code, "CEP_Finalizar returned");

        if code < 0 {
            let message = last_error::message_for(native, code);
            tracing::warn!(code, %message, "CEP_Finalizar failed");
            return Err(AcbrError::native_call(CEP_FINALIZAR, code, message));
        }

        self.state = SessionState::Finalized;
        self.native = None;
        tracing::info!("ACBrCEP finalized");
        Ok(())
    }

    /// Initialize lazily before a call that needs it.
    pub(crate) fn ensure_initialized(&mut self) -> AcbrResult<&N> {
        self.initialize()?;
        self.native()
    }

    /// The bound library.
    pub(crate) fn native(&self) -> AcbrResult<&N> {
        match (&self.native, self.state) {
            (Some(native), _) => Ok(native),
            (None, SessionState::Finalized) => Err(AcbrError::SessionFinalized),
            (None, actual) => Err(AcbrError::invalid_state(SessionState::Loaded, actual)),
        }
    }
}

impl<N: NativeApi> Drop for AcbrSession<N> {
    fn drop(&mut self) {
        if self.state == SessionState::Initialized {
            // Best-effort finalize, log but don't propagate errors
            if let Err(e) = self.finalize() {
                tracing::warn!(error = %e, "Error during session cleanup");
            }
        }
    }
}

/// Query name and version for diagnostics. Failures only cost the field.
fn query_library_info<N: NativeApi>(native: &N) -> LibraryInfo {
    let query = |entry_point: &str, code: i32, text: String| {
        if code < 0 || text.is_empty() {
            tracing::debug!(entry_point, code, "Diagnostic query returned nothing");
            None
        } else {
            Some(text)
        }
    };

    let (code, text) = call_with_buffer(NAME_BUFFER_SIZE, |buffer| native.name(buffer));
    let name = query("CEP_Nome", code, text);
    let (code, text) = call_with_buffer(NAME_BUFFER_SIZE, |buffer| native.version(buffer));
    let version = query("CEP_Versao", code, text);

    LibraryInfo { name, version }
}

/// Convert an argument for the native side.
pub(crate) fn c_string(name: &str, value: &str) -> AcbrResult<CString> {
    CString::new(value).map_err(|_| AcbrError::InvalidArgument {
        name: name.to_string(),
        reason: "Contains null byte".to_string(),
    })
}
