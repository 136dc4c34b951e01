use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handlers::AnalysisHandler;
use crate::services::{FileCredentialStore, PromptVariant};

/// Upload body shared by the proxy and analysis routes
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    #[serde(rename = "imageData")]
    pub image_data: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub prompt: Option<PromptVariant>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CredentialBody {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CredentialStatus {
    /// A key is available (stored or from the environment)
    pub configured: bool,
    /// A key is saved in the credential store
    pub stored: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct AppState {
    pub analysis: Arc<AnalysisHandler>,
    pub credential_store: Arc<FileCredentialStore>,
}

pub mod server {
    use super::*;
    use axum::{
        extract::{DefaultBodyLimit, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use tower_http::limit::RequestBodyLimitLayer;

    pub fn create_router(state: Arc<AppState>, body_limit: usize) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_check))
            .route("/api/analyze", post(proxy_handler).fallback(method_not_allowed))
            .route("/api/estimate", post(estimate_handler))
            .route("/api/session", get(get_session).delete(reset_session))
            .route(
                "/api/credential",
                get(get_credential).put(save_credential).delete(clear_credential),
            )
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(body_limit))
            .with_state(state)
    }

    fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
        (status, Json(ErrorBody { error: message.into() })).into_response()
    }

    /// Thin proxy: forwards the upload and returns the upstream JSON verbatim.
    async fn proxy_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
        let request: AnalyzeBody = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(e) => {
                log::error!("❌ Failed to parse proxy request: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        };

        match state
            .analysis
            .forward(&request.image_data, request.api_key.as_deref(), request.prompt)
            .await
        {
            Ok(upstream) => (StatusCode::OK, Json(upstream)).into_response(),
            Err(e) => {
                log::error!("❌ API Error: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn method_not_allowed() -> Response {
        error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    /// Full analysis. Failures are reported inside the body, not as HTTP errors.
    async fn estimate_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
        let request: AnalyzeBody = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(e) => {
                log::error!("❌ Failed to parse analysis request: {}", e);
                return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
            }
        };

        let report = state
            .analysis
            .analyze(&request.image_data, request.api_key.as_deref(), request.prompt)
            .await;

        (StatusCode::OK, Json(report)).into_response()
    }

    async fn get_session(State(state): State<Arc<AppState>>) -> Response {
        Json(state.analysis.session().await).into_response()
    }

    async fn reset_session(State(state): State<Arc<AppState>>) -> StatusCode {
        state.analysis.reset_tally().await;
        StatusCode::NO_CONTENT
    }

    async fn get_credential(State(state): State<Arc<AppState>>) -> Response {
        let stored = match state.credential_store.load().await {
            Ok(key) => key.is_some(),
            Err(e) => {
                log::error!("Failed to read credential store: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        };
        let configured = stored || state.analysis.has_configured_credential().await;

        Json(CredentialStatus { configured, stored }).into_response()
    }

    async fn save_credential(State(state): State<Arc<AppState>>, body: String) -> Response {
        let request: CredentialBody = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        };

        if request.api_key.trim().is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "API key must not be empty");
        }

        match state.credential_store.save(&request.api_key).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => {
                log::error!("Failed to save API key: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn clear_credential(State(state): State<Arc<AppState>>) -> Response {
        match state.credential_store.clear().await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => {
                log::error!("Failed to clear API key: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn root_handler() -> &'static str {
        "CaloriAI - POST a food photo to /api/estimate (or /api/analyze for the raw Claude reply)"
    }

    async fn health_check() -> &'static str {
        "OK"
    }
}
