//! Dynamic library loading for ACBrCEP.
//!
//! This module opens the vendor-supplied shared library, binds its exported
//! entry points, and defines [`NativeApi`], the call surface the session
//! drives. Binding is all-or-nothing for the required entry points; the
//! configuration entry points are optional.

use crate::error::{AcbrError, AcbrResult};
use crate::marshal::CallBuffer;
use libloading::Library;
use std::ffi::{c_char, c_int, CStr};
use std::path::Path;

pub const CEP_INICIALIZAR: &str = "CEP_Inicializar";
pub const CEP_FINALIZAR: &str = "CEP_Finalizar";
pub const CEP_NOME: &str = "CEP_Nome";
pub const CEP_VERSAO: &str = "CEP_Versao";
pub const CEP_ULTIMO_RETORNO: &str = "CEP_UltimoRetorno";
pub const CEP_BUSCAR_POR_CEP: &str = "CEP_BuscarPorCEP";
pub const CEP_BUSCAR_POR_LOGRADOURO: &str = "CEP_BuscarPorLogradouro";
pub const CEP_CONFIG_IMPORTAR: &str = "CEP_ConfigImportar";
pub const CEP_CONFIG_EXPORTAR: &str = "CEP_ConfigExportar";
pub const CEP_CONFIG_LER: &str = "CEP_ConfigLer";
pub const CEP_CONFIG_GRAVAR: &str = "CEP_ConfigGravar";

/// Function signature for CEP_Inicializar.
///
/// ```c
/// int CEP_Inicializar(const char *eArqConfig, const char *eChaveCrypt);
/// ```
pub type InitializeFn =
    unsafe extern "C" fn(config_path: *const c_char, crypt_key: *const c_char) -> c_int;

/// Function signature for CEP_Finalizar.
pub type FinalizeFn = unsafe extern "C" fn() -> c_int;

/// Function signature for text queries (CEP_Nome, CEP_Versao,
/// CEP_UltimoRetorno, CEP_ConfigExportar).
///
/// ```c
/// int CEP_Nome(char *sNome, int *esTamanho);
/// ```
pub type TextFn = unsafe extern "C" fn(buffer: *mut c_char, length: *mut c_int) -> c_int;

/// Function signature for CEP_BuscarPorCEP.
///
/// ```c
/// int CEP_BuscarPorCEP(const char *eCEP, char *sResposta, int *esTamanho);
/// ```
pub type SearchByCepFn =
    unsafe extern "C" fn(cep: *const c_char, buffer: *mut c_char, length: *mut c_int) -> c_int;

/// Function signature for CEP_BuscarPorLogradouro.
///
/// ```c
/// int CEP_BuscarPorLogradouro(const char *eCidade, const char *eTipo_Logradouro,
///     const char *eLogradouro, const char *eUF, const char *eBairro,
///     char *sResposta, int *esTamanho);
/// ```
pub type SearchByStreetFn = unsafe extern "C" fn(
    city: *const c_char,
    street_type: *const c_char,
    street: *const c_char,
    state: *const c_char,
    district: *const c_char,
    buffer: *mut c_char,
    length: *mut c_int,
) -> c_int;

/// Function signature for configuration file operations (CEP_ConfigImportar,
/// CEP_ConfigLer, CEP_ConfigGravar).
pub type ConfigFileFn = unsafe extern "C" fn(path: *const c_char) -> c_int;

/// Call surface of the ACBrCEP library.
///
/// Every method returns the native status code: `>= 0` is success. Text
/// outputs land in the supplied [`CallBuffer`]. The configuration methods
/// return `None` when the library does not export the entry point.
pub trait NativeApi: Send + 'static {
    fn initialize(&self, config_path: &CStr, crypt_key: &CStr) -> c_int;

    fn finalize(&self) -> c_int;

    fn name(&self, buffer: &mut CallBuffer) -> c_int;

    fn version(&self, buffer: &mut CallBuffer) -> c_int;

    fn last_return(&self, buffer: &mut CallBuffer) -> c_int;

    fn search_by_cep(&self, cep: &CStr, buffer: &mut CallBuffer) -> c_int;

    fn search_by_street(
        &self,
        city: &CStr,
        street_type: &CStr,
        street: &CStr,
        state: &CStr,
        district: &CStr,
        buffer: &mut CallBuffer,
    ) -> c_int;

    fn config_import(&self, _path: &CStr) -> Option<c_int> {
        None
    }

    fn config_export(&self, _buffer: &mut CallBuffer) -> Option<c_int> {
        None
    }

    fn config_read(&self, _path: &CStr) -> Option<c_int> {
        None
    }

    fn config_write(&self, _path: &CStr) -> Option<c_int> {
        None
    }
}

/// Loaded ACBrCEP library with extracted function pointers.
pub struct AcbrLibrary {
    /// Keeps the function pointers below valid.
    _library: Library,

    /// Path to the library file.
    pub path: String,

    initialize: InitializeFn,
    finalize: FinalizeFn,
    name: TextFn,
    version: TextFn,
    last_return: TextFn,
    search_by_cep: SearchByCepFn,
    search_by_street: SearchByStreetFn,

    config_import: Option<ConfigFileFn>,
    config_export: Option<TextFn>,
    config_read: Option<ConfigFileFn>,
    config_write: Option<ConfigFileFn>,
}

impl AcbrLibrary {
    /// Load ACBrCEP from a shared library file.
    ///
    /// Symbols are matched by name only; a symbol exported with a different
    /// signature than declared above cannot be detected here.
    pub fn load<P: AsRef<Path>>(path: P) -> AcbrResult<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        // SAFETY: loading runs the library's initializers. The library is
        // the vendor build resolved for this platform.
        let library =
            unsafe { Library::new(path) }.map_err(|e| AcbrError::load_error(&path_str, e))?;

        // SAFETY: each type alias above mirrors the vendor's C declaration.
        let bound = unsafe {
            Self {
                initialize: required(&library, CEP_INICIALIZAR)?,
                finalize: required(&library, CEP_FINALIZAR)?,
                name: required(&library, CEP_NOME)?,
                version: required(&library, CEP_VERSAO)?,
                last_return: required(&library, CEP_ULTIMO_RETORNO)?,
                search_by_cep: required(&library, CEP_BUSCAR_POR_CEP)?,
                search_by_street: required(&library, CEP_BUSCAR_POR_LOGRADOURO)?,
                config_import: optional(&library, CEP_CONFIG_IMPORTAR),
                config_export: optional(&library, CEP_CONFIG_EXPORTAR),
                config_read: optional(&library, CEP_CONFIG_LER),
                config_write: optional(&library, CEP_CONFIG_GRAVAR),
                path: path_str,
                _library: library,
            }
        };

        tracing::info!(
            path = %bound.path,
            has_config_entry_points = bound.config_export.is_some(),
            "Loaded ACBrCEP library"
        );

        Ok(bound)
    }
}

/// Bind a required symbol.
///
/// # Safety
/// `T` must be the function-pointer type of the exported symbol.
unsafe fn required<T: Copy>(library: &Library, symbol: &'static str) -> AcbrResult<T> {
    unsafe {
        library
            .get::<T>(symbol.as_bytes())
            .map(|s| *s)
            .map_err(|_| AcbrError::symbol_not_found(symbol))
    }
}

/// Bind an optional symbol.
///
/// # Safety
/// Same as [`required`].
unsafe fn optional<T: Copy>(library: &Library, symbol: &'static str) -> Option<T> {
    let bound = unsafe { library.get::<T>(symbol.as_bytes()).ok().map(|s| *s) };
    if bound.is_none() {
        tracing::debug!(symbol, "Optional entry point not exported");
    }
    bound
}

impl NativeApi for AcbrLibrary {
    fn initialize(&self, config_path: &CStr, crypt_key: &CStr) -> c_int {
        unsafe { (self.initialize)(config_path.as_ptr(), crypt_key.as_ptr()) }
    }

    fn finalize(&self) -> c_int {
        unsafe { (self.finalize)() }
    }

    fn name(&self, buffer: &mut CallBuffer) -> c_int {
        let (ptr, len) = buffer.as_raw_parts();
        unsafe { (self.name)(ptr, len) }
    }

    fn version(&self, buffer: &mut CallBuffer) -> c_int {
        let (ptr, len) = buffer.as_raw_parts();
        unsafe { (self.version)(ptr, len) }
    }

    fn last_return(&self, buffer: &mut CallBuffer) -> c_int {
        let (ptr, len) = buffer.as_raw_parts();
        unsafe { (self.last_return)(ptr, len) }
    }

    fn search_by_cep(&self, cep: &CStr, buffer: &mut CallBuffer) -> c_int {
        let (ptr, len) = buffer.as_raw_parts();
        unsafe { (self.search_by_cep)(cep.as_ptr(), ptr, len) }
    }

    fn search_by_street(
        &self,
        city: &CStr,
        street_type: &CStr,
        street: &CStr,
        state: &CStr,
        district: &CStr,
        buffer: &mut CallBuffer,
    ) -> c_int {
        let (ptr, len) = buffer.as_raw_parts();
        unsafe {
            (self.search_by_street)(
                city.as_ptr(),
                street_type.as_ptr(),
                street.as_ptr(),
                state.as_ptr(),
                district.as_ptr(),
                ptr,
                len,
            )
        }
    }

    fn config_import(&self, path: &CStr) -> Option<c_int> {
        self.config_import.map(|f| unsafe { f(path.as_ptr()) })
    }

    fn config_export(&self, buffer: &mut CallBuffer) -> Option<c_int> {
        self.config_export.map(|f| {
            let (ptr, len) = buffer.as_raw_parts();
            unsafe { f(ptr, len) }
        })
    }

    fn config_read(&self, path: &CStr) -> Option<c_int> {
        self.config_read.map(|f| unsafe { f(path.as_ptr()) })
    }

    fn config_write(&self, path: &CStr) -> Option<c_int> {
        self.config_write.map(|f| unsafe { f(path.as_ptr()) })
    }
}

impl std::fmt::Debug for AcbrLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcbrLibrary").field("path", &self.path).finish_non_exhaustive()
    }
}
