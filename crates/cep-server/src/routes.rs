//! HTTP routes over the CEP service.
//!
//! Handlers move each lookup onto the blocking pool, since native calls
//! block, and bound the whole guarded sequence by the configured timeout.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use lib_acbr_ffi::error::INTERNAL_ERROR_CODE;
use lib_acbr_ffi::{CepService, NativeApi};
use lib_types::{AddressQuery, ResultEnvelope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
pub struct AppState<N: NativeApi> {
    pub service: Arc<CepService<N>>,
    pub request_timeout: Duration,
}

/// Build the router.
pub fn router<N: NativeApi + 'static>(state: Arc<AppState<N>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/info", get(info::<N>))
        .route("/cep/:cep", get(cep_lookup::<N>))
        .route("/logradouro", get(address_lookup::<N>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Address lookup parameters, named as in the ACBrCEP API.
///
/// Every field is optional here so that blank or missing fields are
/// rejected by the service with a structured failure.
#[derive(Debug, Default, Deserialize)]
pub struct AddressParams {
    cidade: Option<String>,
    tipo: Option<String>,
    logradouro: Option<String>,
    uf: Option<String>,
    bairro: Option<String>,
}

impl From<AddressParams> for AddressQuery {
    fn from(params: AddressParams) -> Self {
        AddressQuery::new(
            params.cidade.unwrap_or_default(),
            params.tipo.unwrap_or_default(),
            params.logradouro.unwrap_or_default(),
            params.uf.unwrap_or_default(),
        )
        .with_district(params.bairro.unwrap_or_default())
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn info<N: NativeApi + 'static>(State(state): State<Arc<AppState<N>>>) -> Response {
    let envelope = guarded(&state, |service| {
        ResultEnvelope::success(json!(service.status()))
    })
    .await;
    envelope_response(envelope)
}

async fn cep_lookup<N: NativeApi + 'static>(
    State(state): State<Arc<AppState<N>>>,
    Path(cep): Path<String>,
) -> Response {
    let envelope = guarded(&state, move |service| service.search_by_cep(&cep)).await;
    envelope_response(envelope)
}

async fn address_lookup<N: NativeApi + 'static>(
    State(state): State<Arc<AppState<N>>>,
    Query(params): Query<AddressParams>,
) -> Response {
    let query = AddressQuery::from(params);
    let envelope = guarded(&state, move |service| service.search_by_address(&query)).await;
    envelope_response(envelope)
}

/// Run `call` on the blocking pool, bounded by the request timeout.
///
/// A timed-out call keeps running and holding the session lock; later
/// requests queue behind it.
async fn guarded<N, F>(state: &AppState<N>, call: F) -> ResultEnvelope<Value>
where
    N: NativeApi + 'static,
    F: FnOnce(&CepService<N>) -> ResultEnvelope<Value> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let task = tokio::task::spawn_blocking(move || call(&service));

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Lookup task failed");
            ResultEnvelope::failure(INTERNAL_ERROR_CODE, format!("lookup task failed: {err}"))
        }
        Err(_) => {
            tracing::warn!(timeout = ?state.request_timeout, "Lookup timed out");
            ResultEnvelope::failure(
                INTERNAL_ERROR_CODE,
                format!("lookup timed out after {:?}", state.request_timeout),
            )
        }
    }
}

/// 200 with the payload, or 500 with `{error, code}`.
fn envelope_response(envelope: ResultEnvelope<Value>) -> Response {
    match envelope {
        ResultEnvelope::Success { data } => (StatusCode::OK, Json(data)).into_response(),
        ResultEnvelope::Failure { code, message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": message, "code": code })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use lib_acbr_ffi::mock::MockNative;
    use lib_acbr_ffi::AcbrSession;
    use lib_types::ConfigReference;
    use tower::ServiceExt;

    const PAYLOAD: &str = r#"{"Logradouro":"X","Bairro":"Y","Municipio":"Z"}"#;

    fn app(native: &MockNative) -> Router {
        app_with_timeout(native, Duration::from_secs(5))
    }

    fn app_with_timeout(native: &MockNative, request_timeout: Duration) -> Router {
        let session = AcbrSession::with_native(native.clone(), ConfigReference::new("ACBrLib.ini", ""));
        router(Arc::new(AppState {
            service: Arc::new(CepService::new(session)),
            request_timeout,
        }))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_cep_lookup_ok() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let (status, body) = get(app(&native), "/cep/01001000").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Logradouro"], "X");
        assert_eq!(body["Bairro"], "Y");
        assert_eq!(body["Municipio"], "Z");
    }

    #[tokio::test]
    async fn test_invalid_cep_is_500_with_error() {
        let native = MockNative::new().with_cep_response(0, PAYLOAD);
        let (status, body) = get(app(&native), "/cep/invalid").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "invalid CEP: must be 8 numeric digits");
        assert_eq!(body["code"], -1);
        assert_eq!(native.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_native_failure_is_500_with_message() {
        let native = MockNative::new()
            .with_cep_response(-5, "")
            .with_last_error("not found");
        let (status, body) = get(app(&native), "/cep/99999999").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "not found", "code": -5}));
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_500() {
        let native = MockNative::new()
            .with_cep_response(0, PAYLOAD)
            .with_search_delay(Duration::from_millis(300));
        let app = app_with_timeout(&native, Duration::from_millis(20));
        let (status, body) = get(app, "/cep/01001000").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], -999);
        assert!(body["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_address_lookup() {
        let native = MockNative::new().with_street_response(0, r#"[{"CEP":"01001000"}]"#);
        let (status, body) = get(
            app(&native),
            "/logradouro?cidade=Sao%20Paulo&tipo=Praca&logradouro=da%20Se&uf=SP",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"CEP": "01001000"}]));
        assert_eq!(
            native.last_street_args().unwrap(),
            vec!["Sao Paulo", "Praca", "da Se", "SP", ""]
        );
    }

    #[tokio::test]
    async fn test_address_lookup_missing_field() {
        let native = MockNative::new();
        let (status, body) = get(app(&native), "/logradouro?cidade=Franca&uf=SP").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "invalid address query: street_type is required");
    }

    #[tokio::test]
    async fn test_info_reports_state() {
        let native = MockNative::new().with_name("ACBrLibCEP").with_version("1.0.2.83");
        let app = app(&native);

        let (_, body) = get(app.clone(), "/info").await;
        assert_eq!(body["state"], "loaded");

        get(app.clone(), "/cep/01001000").await;
        let (status, body) = get(app, "/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"state": "initialized", "name": "ACBrLibCEP", "version": "1.0.2.83"}));
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = get(app(&MockNative::new()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }
}
