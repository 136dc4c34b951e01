use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::handlers::report;
use crate::models::{AnalysisReport, AnalysisRequest, DailyTally, NutritionEstimate, ProgressState};
use crate::services::extractor::{self, ExtractionError};
use crate::services::photo::{self, ImageError};
use crate::services::{CredentialProvider, InferenceError, InferenceService, PromptVariant};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("API key is required")]
    MissingCredential,

    #[error("credential lookup failed: {0}")]
    Credential(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl AnalysisError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Inference(InferenceError::Cancelled))
    }
}

/// Session snapshot for the presentation side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub daily_calories: f64,
    pub analyses: u32,
    pub progress: ProgressState,
    pub goal: f64,
    pub started_at: DateTime<Utc>,
}

/// Decrements the in-flight counter when the analysis ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AnalysisHandler {
    inference: Arc<dyn InferenceService>,
    credentials: Arc<dyn CredentialProvider>,
    default_variant: PromptVariant,
    calorie_goal: f64,
    tally: Mutex<DailyTally>,
    in_flight: AtomicUsize,
    shutdown: CancellationToken,
}

impl AnalysisHandler {
    pub fn new(
        inference: Arc<dyn InferenceService>,
        credentials: Arc<dyn CredentialProvider>,
        default_variant: PromptVariant,
        calorie_goal: f64,
    ) -> Self {
        Self {
            inference,
            credentials,
            default_variant,
            calorie_goal,
            tally: Mutex::new(DailyTally::default()),
            in_flight: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Request key first, then the configured providers.
    pub async fn resolve_credential(&self, explicit: Option<&str>) -> Result<String, AnalysisError> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }

        match self.credentials.credential().await {
            Ok(Some(key)) => Ok(key),
            Ok(None) => {
                log::warn!("⚠️ No API key in request and none configured");
                Err(AnalysisError::MissingCredential)
            }
            Err(e) => Err(AnalysisError::Credential(e.to_string())),
        }
    }

    /// Whether a stored or environment key exists. Used for status polls, so it stays quiet.
    pub async fn has_configured_credential(&self) -> bool {
        matches!(self.credentials.credential().await, Ok(Some(_)))
    }

    /// Decode an uploaded payload (base64 or data URL) into a request.
    pub async fn build_request(
        &self,
        payload: &str,
        api_key: Option<&str>,
    ) -> Result<AnalysisRequest, AnalysisError> {
        let image = photo::decode_payload(payload)?;
        let credential = self.resolve_credential(api_key).await?;
        Ok(AnalysisRequest { image, credential })
    }

    /// Inference + extraction for one request. The tally is not touched here.
    pub async fn estimate(
        &self,
        request: AnalysisRequest,
        variant: Option<PromptVariant>,
    ) -> Result<NutritionEstimate, AnalysisError> {
        let variant = variant.unwrap_or(self.default_variant);
        let cancel = self.shutdown.child_token();

        let completion = self
            .inference
            .submit_with_cancel(&request.image, &request.credential, variant, &cancel)
            .await?;

        Ok(extractor::extract(&completion)?)
    }

    /// Full pipeline. Never fails: errors become an error result with 0 calories.
    pub async fn analyze(
        &self,
        payload: &str,
        api_key: Option<&str>,
        variant: Option<PromptVariant>,
    ) -> AnalysisReport {
        let _in_flight = InFlight::start(&self.in_flight);
        log::info!("📸 Starting analysis ({} bytes payload)", payload.len());

        let outcome = match self.build_request(payload, api_key).await {
            Ok(request) => self.estimate(request, variant).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(estimate) => {
                let daily_calories = {
                    let mut tally = self.tally.lock().await;
                    tally.add(&estimate);
                    tally.total_calories
                };

                log::info!(
                    "✅ Analysis complete: {} ({:.0} kcal), today {:.0} kcal",
                    estimate.detected_food,
                    estimate.calories,
                    daily_calories
                );

                AnalysisReport {
                    success: true,
                    summary: report::format_summary(&estimate, daily_calories, self.calorie_goal),
                    result: estimate,
                    error: None,
                    daily_calories,
                }
            }
            Err(e) => {
                if e.is_cancelled() {
                    log::warn!("🛑 Analysis cancelled");
                } else if matches!(&e, AnalysisError::Inference(inner) if inner.is_auth()) {
                    log::error!("🔐 API key rejected by Claude: {}", e);
                } else {
                    log::error!("❌ Analysis failed: {}", e);
                }

                let message = e.to_string();
                let daily_calories = self.tally.lock().await.total_calories;

                AnalysisReport {
                    success: false,
                    result: NutritionEstimate::error(&message),
                    summary: report::format_error(&message, daily_calories),
                    error: Some(message),
                    daily_calories,
                }
            }
        }
    }

    /// Proxy path: forward the upload and hand back the upstream JSON as is.
    pub async fn forward(
        &self,
        payload: &str,
        api_key: Option<&str>,
        variant: Option<PromptVariant>,
    ) -> Result<serde_json::Value, AnalysisError> {
        let _in_flight = InFlight::start(&self.in_flight);
        let request = self.build_request(payload, api_key).await?;
        let variant = variant.unwrap_or(self.default_variant);

        Ok(self
            .inference
            .forward(&request.image, &request.credential, variant)
            .await?)
    }

    pub fn progress(&self) -> ProgressState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            ProgressState::Analyzing
        } else {
            ProgressState::Idle
        }
    }

    pub async fn session(&self) -> SessionStatus {
        let tally = self.tally.lock().await;
        SessionStatus {
            daily_calories: tally.total_calories,
            analyses: tally.analyses,
            progress: self.progress(),
            goal: self.calorie_goal,
            started_at: tally.started_at,
        }
    }

    pub async fn reset_tally(&self) {
        self.tally.lock().await.reset();
        log::info!("🔄 Daily tally reset");
    }

    /// Cancel every in-flight analysis. Cancelled analyses leave the tally alone.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{RawCompletion, ERROR_FOOD};
    use crate::services::StaticCredential;
    use base64::{engine::general_purpose, Engine};
    use std::time::Duration;

    /// Scripted backend: replies with a fixed completion or a fixed upstream error.
    pub(crate) struct FakeInference {
        pub reply: Result<String, (u16, String)>,
        pub delay: Duration,
    }

    impl FakeInference {
        pub(crate) fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(status: u16, body: &str) -> Self {
            Self {
                reply: Err((status, body.to_string())),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl InferenceService for FakeInference {
        async fn submit(
            &self,
            image: &[u8],
            credential: &str,
            _variant: PromptVariant,
        ) -> Result<RawCompletion, InferenceError> {
            if image.is_empty() {
                return Err(InferenceError::EmptyImage);
            }
            if credential.trim().is_empty() {
                return Err(InferenceError::MissingCredential);
            }
            tokio::time::sleep(self.delay).await;

            match &self.reply {
                Ok(text) => Ok(RawCompletion(text.clone())),
                Err((status, body)) => Err(InferenceError::Upstream {
                    status: *status,
                    body: body.clone(),
                }),
            }
        }

        async fn forward(
            &self,
            image: &[u8],
            credential: &str,
            variant: PromptVariant,
        ) -> Result<serde_json::Value, InferenceError> {
            let completion = self.submit(image, credential, variant).await?;
            Ok(serde_json::json!({
                "content": [{ "type": "text", "text": completion.as_str() }]
            }))
        }
    }

    pub(crate) fn handler_with(inference: FakeInference, key: Option<&str>) -> AnalysisHandler {
        AnalysisHandler::new(
            Arc::new(inference),
            Arc::new(StaticCredential(key.map(str::to_string))),
            PromptVariant::Template,
            2000.0,
        )
    }

    pub(crate) fn upload() -> String {
        format!("data:image/jpeg;base64,{}", general_purpose::STANDARD.encode(b"fake-jpeg"))
    }

    #[tokio::test]
    async fn test_successful_analysis_updates_tally() {
        let handler = handler_with(
            FakeInference::replying(
                r#"Here you go: {"detectedFood":"menemen","calories":320,"confidence":90,"protein":14,"carbs":18,"fat":22,"advice":"High in protein."}"#,
            ),
            Some("sk-ant-test"),
        );

        let report = handler.analyze(&upload(), None, None).await;
        assert!(report.success);
        assert_eq!(report.result.detected_food, "menemen");
        assert_eq!(report.result.calories, 320.0);
        assert_eq!(report.daily_calories, 320.0);
        assert!(report.error.is_none());

        let report = handler.analyze(&upload(), None, None).await;
        assert_eq!(report.daily_calories, 640.0);

        let session = handler.session().await;
        assert_eq!(session.analyses, 2);
        assert_eq!(session.progress, ProgressState::Idle);
    }

    #[tokio::test]
    async fn test_upstream_401_becomes_error_result() {
        let handler = handler_with(
            FakeInference::failing(401, "invalid x-api-key"),
            Some("bad-key"),
        );

        let report = handler.analyze(&upload(), None, None).await;

        assert!(!report.success);
        assert_eq!(report.result.detected_food, ERROR_FOOD);
        assert_eq!(report.result.calories, 0.0);
        assert!(report.result.advice.starts_with("Hata: Claude API Error: 401"));
        assert_eq!(report.error.as_deref(), Some("Claude API Error: 401 - invalid x-api-key"));
        assert_eq!(report.daily_calories, 0.0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_leaves_tally_alone() {
        let handler = handler_with(
            FakeInference::replying("Sorry, I cannot identify this image."),
            Some("key"),
        );

        let report = handler.analyze(&upload(), None, None).await;

        assert!(!report.success);
        assert_eq!(report.result.calories, 0.0);
        assert_eq!(handler.session().await.daily_calories, 0.0);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let handler = handler_with(FakeInference::replying("{}"), None);

        let report = handler.analyze(&upload(), None, None).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("API key is required"));

        // istekteki anahtar yeterli
        let report = handler.analyze(&upload(), Some("sk-ant-request"), None).await;
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_configured_credential_check() {
        let without = handler_with(FakeInference::replying("{}"), None);
        assert!(!without.has_configured_credential().await);

        let with = handler_with(FakeInference::replying("{}"), Some("sk-ant-env"));
        assert!(with.has_configured_credential().await);
    }

    #[tokio::test]
    async fn test_invalid_upload() {
        let handler = handler_with(FakeInference::replying("{}"), Some("key"));

        let report = handler.analyze("data:image/jpeg;base64,", None, None).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("image is empty"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_analysis() {
        let mut fake = FakeInference::replying(r#"{"detectedFood":"pide","calories":600}"#);
        fake.delay = Duration::from_secs(10);
        let handler = Arc::new(handler_with(fake, Some("key")));

        let running = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.analyze(&upload(), None, None).await })
        };

        // analiz başlayana kadar bekle
        while handler.progress() != ProgressState::Analyzing {
            tokio::task::yield_now().await;
        }
        handler.shutdown();

        let report = running.await.unwrap();
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("analysis was cancelled"));
        assert_eq!(handler.session().await.daily_calories, 0.0);
        assert_eq!(handler.progress(), ProgressState::Idle);
    }

    #[tokio::test]
    async fn test_reset_tally() {
        let handler = handler_with(FakeInference::replying(r#"{"calories":250}"#), Some("key"));

        handler.analyze(&upload(), None, None).await;
        assert_eq!(handler.session().await.daily_calories, 250.0);

        handler.reset_tally().await;
        assert_eq!(handler.session().await.daily_calories, 0.0);
        assert_eq!(handler.session().await.analyses, 0);
    }

    #[tokio::test]
    async fn test_forward_passes_upstream_body() {
        let handler = handler_with(FakeInference::replying("merhaba"), Some("key"));

        let body = handler.forward(&upload(), None, None).await.unwrap();
        assert_eq!(body["content"][0]["text"], "merhaba");
    }
}
