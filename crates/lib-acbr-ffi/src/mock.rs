//! In-process stand-in for the ACBrCEP library.
//!
//! [`MockNative`] scripts return codes and response text per entry point and
//! counts every call. Clones share state, so a test can hand one clone to a
//! session and inspect another.

use crate::loader::{
    NativeApi, CEP_BUSCAR_POR_CEP, CEP_BUSCAR_POR_LOGRADOURO, CEP_CONFIG_EXPORTAR,
    CEP_CONFIG_GRAVAR, CEP_CONFIG_IMPORTAR, CEP_CONFIG_LER, CEP_FINALIZAR, CEP_INICIALIZAR,
    CEP_NOME, CEP_ULTIMO_RETORNO, CEP_VERSAO,
};
use crate::marshal::CallBuffer;
use std::collections::HashMap;
use std::ffi::{c_int, CStr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    init_code: c_int,
    finalize_code: c_int,
    name: (c_int, String),
    version: (c_int, String),
    last_return: (c_int, String),
    cep_response: (c_int, String),
    street_response: (c_int, String),
    config_export: Option<String>,
    config_files: bool,
    report_length: bool,
    search_delay: Duration,
    calls: HashMap<&'static str, usize>,
    init_args: Option<(String, String)>,
    last_cep: Option<String>,
    last_street_args: Option<Vec<String>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            init_code: 0,
            finalize_code: 0,
            name: (0, "ACBrLibCEP".to_string()),
            version: (0, "0.0.0.0".to_string()),
            last_return: (0, String::new()),
            cep_response: (0, String::new()),
            street_response: (0, String::new()),
            config_export: None,
            config_files: false,
            report_length: true,
            search_delay: Duration::from_millis(2),
            calls: HashMap::new(),
            init_args: None,
            last_cep: None,
            last_street_args: None,
        }
    }
}

/// Scripted [`NativeApi`] implementation.
#[derive(Clone, Debug, Default)]
pub struct MockNative {
    state: Arc<Mutex<MockState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockNative {
    /// A library whose every entry point succeeds with empty text.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, entry_point: &'static str) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        *state.calls.entry(entry_point).or_default() += 1;
        state
    }

    fn bump(&self, entry_point: &'static str) {
        *self.state().calls.entry(entry_point).or_default() += 1;
    }

    fn write(&self, buffer: &mut CallBuffer, code: c_int, text: &str) -> c_int {
        let report_length = self.state().report_length;
        let bytes = text.as_bytes();
        let n = bytes.len().min(buffer.capacity());
        buffer.as_mut_slice()[..n].copy_from_slice(&bytes[..n]);
        if report_length {
            buffer.set_reported_len(bytes.len() as c_int);
        }
        code
    }

    pub fn with_init_code(self, code: c_int) -> Self {
        self.set_init_code(code);
        self
    }

    pub fn with_finalize_code(self, code: c_int) -> Self {
        self.set_finalize_code(code);
        self
    }

    pub fn with_name(self, name: &str) -> Self {
        self.state().name = (0, name.to_string());
        self
    }

    pub fn with_name_code(self, code: c_int) -> Self {
        self.state().name.0 = code;
        self
    }

    pub fn with_version(self, version: &str) -> Self {
        self.state().version = (0, version.to_string());
        self
    }

    pub fn with_last_error(self, message: &str) -> Self {
        self.state().last_return.1 = message.to_string();
        self
    }

    pub fn with_last_return_code(self, code: c_int) -> Self {
        self.state().last_return.0 = code;
        self
    }

    pub fn with_cep_response(self, code: c_int, body: &str) -> Self {
        self.state().cep_response = (code, body.to_string());
        self
    }

    pub fn with_street_response(self, code: c_int, body: &str) -> Self {
        self.state().street_response = (code, body.to_string());
        self
    }

    /// Export `ini` from `CEP_ConfigExportar`.
    pub fn with_config_export(self, ini: &str) -> Self {
        self.state().config_export = Some(ini.to_string());
        self
    }

    /// Export the configuration file entry points, all succeeding.
    pub fn with_config_entry_points(self) -> Self {
        self.state().config_files = true;
        self
    }

    /// Leave the length cell untouched, as builds that only NUL-terminate do.
    pub fn without_length_report(self) -> Self {
        self.state().report_length = false;
        self
    }

    /// Make every `CEP_BuscarPorCEP` block for `delay`.
    pub fn with_search_delay(self, delay: Duration) -> Self {
        self.state().search_delay = delay;
        self
    }

    pub fn set_init_code(&self, code: c_int) {
        self.state().init_code = code;
    }

    pub fn set_finalize_code(&self, code: c_int) {
        self.state().finalize_code = code;
    }

    /// Calls made to `entry_point` so far.
    pub fn calls(&self, entry_point: &str) -> usize {
        self.state().calls.get(entry_point).copied().unwrap_or(0)
    }

    /// Calls made to any entry point so far.
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Config path and crypt key of the last `CEP_Inicializar`.
    pub fn init_args(&self) -> Option<(String, String)> {
        self.state().init_args.clone()
    }

    /// Code passed to the last `CEP_BuscarPorCEP`.
    pub fn last_cep(&self) -> Option<String> {
        self.state().last_cep.clone()
    }

    /// Arguments passed to the last `CEP_BuscarPorLogradouro`.
    pub fn last_street_args(&self) -> Option<Vec<String>> {
        self.state().last_street_args.clone()
    }

    /// Highest number of searches observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn text(value: &CStr) -> String {
    value.to_string_lossy().into_owned()
}

impl NativeApi for MockNative {
    fn initialize(&self, config_path: &CStr, crypt_key: &CStr) -> c_int {
        let mut state = self.record(CEP_INICIALIZAR);
        state.init_args = Some((text(config_path), text(crypt_key)));
        state.init_code
    }

    fn finalize(&self) -> c_int {
        self.record(CEP_FINALIZAR).finalize_code
    }

    fn name(&self, buffer: &mut CallBuffer) -> c_int {
        let (code, name) = self.record(CEP_NOME).name.clone();
        self.write(buffer, code, &name)
    }

    fn version(&self, buffer: &mut CallBuffer) -> c_int {
        let (code, version) = self.record(CEP_VERSAO).version.clone();
        self.write(buffer, code, &version)
    }

    fn last_return(&self, buffer: &mut CallBuffer) -> c_int {
        let (code, message) = self.record(CEP_ULTIMO_RETORNO).last_return.clone();
        self.write(buffer, code, &message)
    }

    fn search_by_cep(&self, cep: &CStr, buffer: &mut CallBuffer) -> c_int {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = self.state().search_delay;
        std::thread::sleep(delay);

        let (code, body) = {
            let mut state = self.record(CEP_BUSCAR_POR_CEP);
            state.last_cep = Some(text(cep));
            state.cep_response.clone()
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.write(buffer, code, &body)
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
        let (code, body) = {
            let mut mock = self.record(CEP_BUSCAR_POR_LOGRADOURO);
            mock.last_street_args = Some(
                [city, street_type, street, state, district]
                    .into_iter()
                    .map(text)
                    .collect(),
            );
            mock.street_response.clone()
        };
        self.write(buffer, code, &body)
    }

    fn config_import(&self, _path: &CStr) -> Option<c_int> {
        let state = self.state();
        if !state.config_files {
            return None;
        }
        drop(state);
        self.bump(CEP_CONFIG_IMPORTAR);
        Some(0)
    }

    fn config_export(&self, buffer: &mut CallBuffer) -> Option<c_int> {
        let ini = self.state().config_export.clone()?;
        self.bump(CEP_CONFIG_EXPORTAR);
        Some(self.write(buffer, 0, &ini))
    }

    fn config_read(&self, _path: &CStr) -> Option<c_int> {
        if !self.state().config_files {
            return None;
        }
        self.bump(CEP_CONFIG_LER);
        Some(0)
    }

    fn config_write(&self, _path: &CStr) -> Option<c_int> {
        if !self.state().config_files {
            return None;
        }
        self.bump(CEP_CONFIG_GRAVAR);
        Some(0)
    }
}
