use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::EngineError;
use crate::server::AppState;
use crate::translate::{Backend, DialectCatalog, DialectId, ErrorLevel, ServiceStatus};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: ServiceStatus,
    pub dialects: DialectCatalog,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslatePayload {
    pub sql: String,
    /// Missing means the engine's generic dialect.
    #[serde(default)]
    pub from: Option<DialectId>,
    #[serde(default)]
    pub to: Option<DialectId>,
    #[serde(default)]
    pub error_level: ErrorLevel,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TranslateResponse {
    pub sql: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("translation engine is still loading")]
    Loading,

    #[error("translation engine unavailable: {0}")]
    Unavailable(String),

    #[error("unknown dialect `{0}`")]
    UnknownDialect(DialectId),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Loading | ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UnknownDialect(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceStatus> for ApiError {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Failed { reason } => ApiError::Unavailable(reason),
            _ => ApiError::Loading,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

pub async fn status<B: Backend>(State(app): State<AppState<B>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: app.service.status(),
        dialects: app.service.catalog(),
    })
}

pub async fn dialects<B: Backend>(State(app): State<AppState<B>>) -> Json<DialectCatalog> {
    Json(app.service.catalog())
}

pub async fn translate<B: Backend>(
    State(app): State<AppState<B>>,
    Json(payload): Json<TranslatePayload>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let service = &app.service;
    if !service.is_ready() {
        return Err(service.status().into());
    }

    let catalog = service.catalog();
    let unset = DialectId::new("");
    let from = payload.from.unwrap_or_else(|| unset.clone());
    let to = payload.to.unwrap_or(unset);
    for id in [&from, &to] {
        if !id.as_str().is_empty() && !catalog.contains(id) {
            return Err(ApiError::UnknownDialect(id.clone()));
        }
    }

    debug!(%from, %to, error_level = ?payload.error_level, "api translation");
    let sql = service
        .translate(&payload.sql, &from, &to, payload.error_level)
        .await
        .map_err(|err| {
            error!(error = %err, "api translation failed");
            err
        })?;
    Ok(Json(TranslateResponse { sql }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::translate::testing::ScriptedBackend;
    use crate::translate::{is_error_block, TranslationService};

    async fn app(ready: bool) -> AppState<ScriptedBackend> {
        let service = Arc::new(TranslationService::new(ScriptedBackend::new()));
        if ready {
            service.initialize().await;
        }
        AppState::new(service, Duration::from_millis(600))
    }

    fn payload(value: serde_json::Value) -> Json<TranslatePayload> {
        Json(serde_json::from_value(value).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_loading_then_ready() {
        let state = app(false).await;
        let Json(response) = status(State(state.clone())).await;
        assert_eq!(response.status, ServiceStatus::Uninitialized);
        assert_eq!(response.dialects, DialectCatalog::default());

        state.service.initialize().await;
        let Json(response) = status(State(state)).await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "status": {"state": "ready"},
                "dialects": ["clickhouse", "mysql", "postgres"]
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn translate_while_loading_is_unavailable() {
        let err = translate(State(app(false).await), payload(json!({"sql": "SELECT 1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Loading));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn translate_after_failed_start_reports_the_reason() {
        let service = Arc::new(TranslationService::new(ScriptedBackend::failing()));
        service.initialize().await;
        let state = AppState::new(service, Duration::from_millis(600));
        let err = translate(State(state), payload(json!({"sql": "SELECT 1"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No module named 'sqlglot'"), "{err}");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[rstest]
    #[case::loading(ApiError::Loading, "translation engine is still loading")]
    #[case::unknown_dialect(
        ApiError::UnknownDialect(DialectId::from("oracle")),
        "unknown dialect `oracle`"
    )]
    #[case::engine(ApiError::from(EngineError::NotRunning), "worker is not running")]
    fn error_messages(#[case] err: ApiError, #[case] message: &str) {
        assert_eq!(err.to_string(), message);
        let status = err.status_code();
        assert_eq!(err.into_response().status(), status);
    }

    #[rstest]
    #[case::quotes(
        json!({"sql": "SELECT  `a`", "from": "mysql", "to": "postgres"}),
        "SELECT \"a\"\n"
    )]
    #[case::unset_dialects(json!({"sql": "SELECT 1"}), "SELECT 1\n")]
    #[case::lenient(
        json!({"sql": "SELEC 1", "from": "mysql", "to": "mysql", "errorLevel": "IGNORE"}),
        "SELEC 1\n"
    )]
    #[tokio::test(start_paused = true)]
    async fn translate_ok(#[case] input: serde_json::Value, #[case] expected: &str) {
        let Json(response) = translate(State(app(true).await), payload(input))
            .await
            .unwrap();
        assert_eq!(response.sql, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn translate_strict_error_is_inline() {
        let Json(response) = translate(
            State(app(true).await),
            payload(json!({"sql": "SELEC 1", "from": "mysql", "to": "postgres", "errorLevel": "STRICT"})),
        )
        .await
        .unwrap();
        assert!(is_error_block(&response.sql));
    }

    #[tokio::test(start_paused = true)]
    async fn translate_rejects_unknown_dialect() {
        let err = translate(
            State(app(true).await),
            payload(json!({"sql": "SELECT 1", "from": "oracle"})),
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, ApiError::UnknownDialect(id) if id.as_str() == "oracle"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_is_a_server_error() {
        let err = translate(
            State(app(true).await),
            payload(json!({"sql": ScriptedBackend::CRASH})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Engine(EngineError::Protocol(_))));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
