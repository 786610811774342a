//! CEP and address lookups.
//!
//! [`AcbrSession`] gains the lookup operations here; [`CepService`] wraps the
//! session in a mutex so the whole initialize → call → error-retrieval
//! sequence runs for one caller at a time, and converts every outcome into
//! a [`ResultEnvelope`].

use crate::error::{AcbrError, AcbrResult, IntoEnvelope};
use crate::last_error;
use crate::lifecycle::{c_string, AcbrSession};
use crate::loader::{
    AcbrLibrary, NativeApi, CEP_BUSCAR_POR_CEP, CEP_BUSCAR_POR_LOGRADOURO, CEP_CONFIG_EXPORTAR,
    CEP_CONFIG_GRAVAR, CEP_CONFIG_IMPORTAR, CEP_CONFIG_LER,
};
use crate::marshal::{call_with_buffer, decode_payload, CONFIG_BUFFER_SIZE, SEARCH_BUFFER_SIZE};
use lib_types::{AddressQuery, Cep, LibraryInfo, ResultEnvelope, SessionState};
use serde_json::Value;
use std::ffi::{c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

impl<N: NativeApi> AcbrSession<N> {
    /// Look up a normalized CEP, initializing the library if needed.
    pub fn search_by_cep(&mut self, cep: &Cep) -> AcbrResult<Value> {
        let cep_arg = c_string("cep", cep.as_str())?;
        let native = self.ensure_initialized()?;

        tracing::debug!(%cep, "Searching by CEP");
        let (code, text) =
            call_with_buffer(SEARCH_BUFFER_SIZE, |buffer| native.search_by_cep(&cep_arg, buffer));
        check(native, CEP_BUSCAR_POR_CEP, code)?;

        tracing::debug!(%cep, len = text.len(), "CEP response received");
        Ok(decode_payload(text))
    }

    /// Look up addresses by street, initializing the library if needed.
    pub fn search_by_address(&mut self, query: &AddressQuery) -> AcbrResult<Value> {
        if let Some(field) = query.missing_field() {
            return Err(AcbrError::InvalidInput(format!(
                "invalid address query: {field} is required"
            )));
        }

        let city = c_string("city", &query.city)?;
        let street_type = c_string("street_type", &query.street_type)?;
        let street = c_string("street", &query.street)?;
        let state = c_string("state", &query.state)?;
        let district = c_string("district", &query.district)?;
        let native = self.ensure_initialized()?;

        tracing::debug!(
            city = %query.city,
            street = %query.street,
            state = %query.state,
            "Searching by street"
        );
        let (code, text) = call_with_buffer(SEARCH_BUFFER_SIZE, |buffer| {
            native.search_by_street(&city, &street_type, &street, &state, &district, buffer)
        });
        check(native, CEP_BUSCAR_POR_LOGRADOURO, code)?;

        Ok(decode_payload(text))
    }

    /// Export the library's current configuration as INI text.
    pub fn config_export(&mut self) -> AcbrResult<String> {
        let native = self.ensure_initialized()?;
        let mut code = None;
        let (_, text) = call_with_buffer(CONFIG_BUFFER_SIZE, |buffer| {
            code = native.config_export(buffer);
            code.unwrap_or(0)
        });
        let code = code.ok_or(AcbrError::NotExported(CEP_CONFIG_EXPORTAR))?;
        check(native, CEP_CONFIG_EXPORTAR, code)?;
        Ok(text)
    }

    /// Import configuration from an INI file.
    pub fn config_import(&mut self, path: &Path) -> AcbrResult<()> {
        self.config_file_call(CEP_CONFIG_IMPORTAR, path, |native, path| native.config_import(path))
    }

    /// Re-read configuration from an INI file.
    pub fn config_read(&mut self, path: &Path) -> AcbrResult<()> {
        self.config_file_call(CEP_CONFIG_LER, path, |native, path| native.config_read(path))
    }

    /// Write the current configuration to an INI file.
    pub fn config_write(&mut self, path: &Path) -> AcbrResult<()> {
        self.config_file_call(CEP_CONFIG_GRAVAR, path, |native, path| native.config_write(path))
    }

    fn config_file_call<F>(&mut self, entry_point: &'static str, path: &Path, call: F) -> AcbrResult<()>
    where
        F: FnOnce(&N, &CStr) -> Option<c_int>,
    {
        let path_arg = c_string("path", &path.to_string_lossy())?;
        let native = self.ensure_initialized()?;
        let code = call(native, &path_arg).ok_or(AcbrError::NotExported(entry_point))?;
        tracing::debug!(entry_point, code, path = %path.display(), "Configuration call returned");
        check(native, entry_point, code)
    }
}

/// Turn a negative status code into an error carrying the last-error text.
fn check<N: NativeApi>(native: &N, entry_point: &'static str, code: c_int) -> AcbrResult<()> {
    if code >= 0 {
        return Ok(());
    }
    let message = last_error::message_for(native, code);
    tracing::warn!(entry_point, code, %message, "Native call failed");
    Err(AcbrError::native_call(entry_point, code, message))
}

/// Helper trait to recover from poisoned mutexes.
///
/// A panic inside the guarded section is already reported as a failure;
/// later callers keep using the session.
trait RecoverMutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> RecoverMutex<T> for Mutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Session mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Snapshot of the session for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(flatten)]
    pub info: LibraryInfo,
}

/// Serialized access to the process-wide ACBrCEP session.
///
/// Every method holds the session lock for its whole sequence, so no caller
/// observes a partially initialized or finalized library. Calls block for as
/// long as the native library does; impose timeouts around these methods.
pub struct CepService<N: NativeApi = AcbrLibrary> {
    session: Mutex<AcbrSession<N>>,
}

impl<N: NativeApi> CepService<N> {
    pub fn new(session: AcbrSession<N>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Run `f` inside the guarded section, reporting a panic as a failure.
    pub fn guarded<T>(&self, f: impl FnOnce(&mut AcbrSession<N>) -> AcbrResult<T>) -> ResultEnvelope<T> {
        let mut session = self.session.lock_recover();
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *session))) {
            Ok(result) => result.into_envelope(),
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!(%message, "Lookup panicked");
                AcbrError::Panicked(message).into()
            }
        }
    }

    /// Initialize the library now instead of on the first lookup.
    pub fn initialize(&self) -> ResultEnvelope<LibraryInfo> {
        self.guarded(|session| {
            session.initialize()?;
            Ok(session.library_info().clone())
        })
    }

    /// Finalize the library. Lookups fail afterwards.
    pub fn finalize(&self) -> ResultEnvelope<()> {
        self.guarded(|session| session.finalize())
    }

    /// Look up free-form CEP input.
    ///
    /// Input that does not normalize to eight digits fails with code `-1`
    /// before the session is touched.
    pub fn search_by_cep(&self, input: &str) -> ResultEnvelope<Value> {
        let Some(cep) = Cep::parse(input) else {
            tracing::debug!(input, "Rejected CEP input");
            return AcbrError::invalid_cep().into();
        };
        self.guarded(|session| session.search_by_cep(&cep))
    }

    /// Look up addresses by street.
    pub fn search_by_address(&self, query: &AddressQuery) -> ResultEnvelope<Value> {
        self.guarded(|session| session.search_by_address(query))
    }

    /// Export the library configuration as INI text.
    pub fn config_export(&self) -> ResultEnvelope<String> {
        self.guarded(|session| session.config_export())
    }

    /// Import configuration from an INI file.
    pub fn config_import(&self, path: &Path) -> ResultEnvelope<()> {
        self.guarded(|session| session.config_import(path))
    }

    /// Re-read configuration from an INI file.
    pub fn config_read(&self, path: &Path) -> ResultEnvelope<()> {
        self.guarded(|session| session.config_read(path))
    }

    /// Write the current configuration to an INI file.
    pub fn config_write(&self, path: &Path) -> ResultEnvelope<()> {
        self.guarded(|session| session.config_write(path))
    }

    /// Current state and captured library info.
    pub fn status(&self) -> SessionStatus {
        let session = self.session.lock_recover();
        SessionStatus {
            state: session.state(),
            info: session.library_info().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNative;
    use lib_types::ConfigReference;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    const PAYLOAD: &str = r#"{"Logradouro":"X","Bairro":"Y","Municipio":"Z"}"#;

    fn service(native: &MockNative) -> CepService<MockNative> {
        CepService::new(AcbrSession::with_native(
            native.clone(),
            ConfigReference::new("ACBrLib.ini", ""),
        ))
    }

    #[test]
    fn test_invalid_cep_makes_no_native_calls() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = service(&native);

        for input in ["invalid", "", "1234567", "123456789", "01001-00"] {
            let envelope = service.search_by_cep(input);
            assert_eq!(
                envelope,
                ResultEnvelope::failure(-1, "invalid CEP: must be 8 numeric digits")
            );
        }
        assert_eq!(native.total_calls(), 0);
    }

    #[test]
    fn test_cep_lookup_success() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = service(&native);

        let envelope = service.search_by_cep("01001000");
        assert_eq!(
            envelope,
            ResultEnvelope::success(json!({"Logradouro": "X", "Bairro": "Y", "Municipio": "Z"}))
        );
        assert_eq!(native.last_cep().as_deref(), Some("01001000"));
    }

    #[test]
    fn test_cep_lookup_normalizes_input() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = service(&native);

        assert!(service.search_by_cep("01001-000").is_success());
        assert_eq!(native.last_cep().as_deref(), Some("01001000"));
    }

    #[test]
    fn test_cep_lookup_initializes_lazily_once() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = service(&native);

        service.search_by_cep("01001000");
        service.search_by_cep("37200644");
        assert_eq!(native.calls("CEP_Inicializar"), 1);
        assert_eq!(native.calls("CEP_BuscarPorCEP"), 2);
        assert_eq!(service.status().state, SessionState::Initialized);
    }

    #[test]
    fn test_cep_lookup_failure_uses_last_error() {
        let native = MockNative::new()
            .with_cep_response(-5, "")
            .with_last_error("not found");
        let service = service(&native);

        assert_eq!(
            service.search_by_cep("01001000"),
            ResultEnvelope::failure(-5, "not found")
        );
    }

    #[test]
    fn test_cep_lookup_failure_without_text() {
        let native = MockNative::new().with_cep_response(-5, "");
        let service = service(&native);

        assert_eq!(
            service.search_by_cep("01001000"),
            ResultEnvelope::failure(-5, "unknown error (code -5)")
        );
    }

    #[test]
    fn test_non_json_response_is_raw_text() {
        let native = MockNative::new().with_cep_response(0, "[Endereco1]\nLogradouro=X\n");
        let service = service(&native);

        assert_eq!(
            service.search_by_cep("01001000"),
            ResultEnvelope::success(json!("[Endereco1]\nLogradouro=X"))
        );
    }

    #[test]
    fn test_unreported_length_is_scanned() {
        let native = MockNative::new()
            .with_cep_response(0, PAYLOAD)
            .without_length_report();
        let service = service(&native);

        assert_eq!(
            service.search_by_cep("01001000").data(),
            Some(&json!({"Logradouro": "X", "Bairro": "Y", "Municipio": "Z"}))
        );
    }

    #[test]
    fn test_initialize_failure_reported_by_lookup() {
        let native = MockNative::new()
            .with_init_code(-1)
            .with_last_error("Arquivo ACBrLib.ini nao encontrado");
        let service = service(&native);

        assert_eq!(
            service.search_by_cep("01001000"),
            ResultEnvelope::failure(-1, "Arquivo ACBrLib.ini nao encontrado")
        );
        assert_eq!(native.calls("CEP_BuscarPorCEP"), 0);
        assert_eq!(service.status().state, SessionState::Loaded);
    }

    #[test]
    fn test_lookup_after_finalize_fails() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = service(&native);
        service.search_by_cep("01001000");
        assert!(service.finalize().is_success());

        let envelope = service.search_by_cep("01001000");
        assert!(matches!(envelope, ResultEnvelope::Failure { code: -999, .. }));
        assert_eq!(native.calls("CEP_BuscarPorCEP"), 1);
    }

    #[test]
    fn test_address_lookup_success() {
        let native = MockNative::new()
            .with_street_response(0, r#"[{"CEP":"14400000","Logradouro":"Voluntarios da Franca"}]"#);
        let service = service(&native);

        let query = AddressQuery::new("Franca", "Rua", "Voluntarios da Franca", "SP");
        let envelope = service.search_by_address(&query);
        assert_eq!(
            envelope.data(),
            Some(&json!([{"CEP": "14400000", "Logradouro": "Voluntarios da Franca"}]))
        );
        assert_eq!(
            native.last_street_args(),
            Some(vec![
                "Franca".to_string(),
                "Rua".to_string(),
                "Voluntarios da Franca".to_string(),
                "SP".to_string(),
                String::new(),
            ])
        );
    }

    #[test]
    fn test_address_lookup_passes_district() {
        let native = MockNative::new().with_street_response(0, "[]");
        let service = service(&native);

        let query = AddressQuery::new("Sao Paulo", "Praca", "da Se", "SP").with_district("Se");
        assert!(service.search_by_address(&query).is_success());
        assert_eq!(native.last_street_args().unwrap()[4], "Se");
    }

    #[test]
    fn test_address_lookup_requires_fields() {
        let native = MockNative::new();
        let service = service(&native);

        let envelope = service.search_by_address(&AddressQuery::new("Franca", "Rua", "", "SP"));
        assert_eq!(
            envelope,
            ResultEnvelope::failure(-1, "invalid address query: street is required")
        );
        assert_eq!(native.total_calls(), 0);
    }

    #[test]
    fn test_address_lookup_failure() {
        let native = MockNative::new()
            .with_street_response(-10, "")
            .with_last_error("Nenhum endereco encontrado");
        let service = service(&native);

        let query = AddressQuery::new("Franca", "Rua", "Inexistente", "SP");
        assert_eq!(
            service.search_by_address(&query),
            ResultEnvelope::failure(-10, "Nenhum endereco encontrado")
        );
    }

    #[test]
    fn test_config_export() {
        let native = MockNative::new().with_config_export("[CEP]\nWebService=3");
        let service = service(&native);

        assert_eq!(
            service.config_export(),
            ResultEnvelope::success("[CEP]\nWebService=3".to_string())
        );
    }

    #[test]
    fn test_config_entry_points_not_exported() {
        let native = MockNative::new();
        let service = service(&native);

        let envelope = service.config_read(Path::new("ACBrLib.ini"));
        assert!(matches!(
            envelope,
            ResultEnvelope::Failure { code: -999, ref message } if message.contains("CEP_ConfigLer")
        ));
        assert!(!service.config_export().is_success());
    }

    #[test]
    fn test_config_file_calls() {
        let native = MockNative::new().with_config_entry_points();
        let service = service(&native);

        assert!(service.config_import(Path::new("/tmp/import.ini")).is_success());
        assert!(service.config_read(Path::new("/tmp/ACBrLib.ini")).is_success());
        assert!(service.config_write(Path::new("/tmp/ACBrLib.ini")).is_success());
        assert_eq!(native.calls("CEP_ConfigImportar"), 1);
        assert_eq!(native.calls("CEP_ConfigLer"), 1);
        assert_eq!(native.calls("CEP_ConfigGravar"), 1);
    }

    #[test]
    fn test_panic_is_reported_as_failure() {
        let native = MockNative::new();
        let service = service(&native);

        let envelope: ResultEnvelope<()> = service.guarded(|_| panic!("boom"));
        assert_eq!(envelope, ResultEnvelope::failure(-999, "Lookup panicked: boom"));

        // The session stays usable.
        assert!(service.initialize().is_success());
    }

    #[test]
    fn test_concurrent_lookups_initialize_once() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let service = Arc::new(service(&native));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || service.search_by_cep("01001000"))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_success());
        }
        assert_eq!(native.calls("CEP_Inicializar"), 1);
        assert_eq!(native.calls("CEP_BuscarPorCEP"), 8);
        assert_eq!(native.max_concurrency(), 1);
    }
}
