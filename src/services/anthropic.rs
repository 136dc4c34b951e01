use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::ai_service::{InferenceService, PromptVariant};
use super::photo::{ImageError, ImagePreparer, PreparedImage};
use crate::config::Config;
use crate::models::RawCompletion;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("image is empty")]
    EmptyImage,

    #[error("API key is required")]
    MissingCredential,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request did not complete within {0:?}")]
    Timeout(Duration),

    #[error("analysis was cancelled")]
    Cancelled,

    #[error("Claude API Error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("unexpected API response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// Upstream rejected the credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, InferenceError::Upstream { status: 401 | 403, .. })
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String,
    },
    Image {
        #[serde(rename = "type")]
        content_type: String,
        source: ImageSource,
    },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    block_type: String,
    text: Option<String>,
}

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    api_url: String,
    model: String,
    max_tokens: u32,
    api_version: String,
    timeout: Duration,
    preparer: ImagePreparer,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: &Config) -> Self {
        Self {
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_version: config.api_version.clone(),
            timeout: config.request_timeout,
            preparer: ImagePreparer::new(config.max_encoded_image_bytes, config.max_image_dimension),
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, image: PreparedImage, variant: PromptVariant) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        content_type: "text".to_string(),
                        text: variant.prompt().to_string(),
                    },
                    ContentPart::Image {
                        content_type: "image".to_string(),
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: image.media_type,
                            data: image.data,
                        },
                    },
                ],
            }],
        }
    }

    /// One round trip: validate, prepare the image, POST, return the JSON body.
    async fn send(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
    ) -> Result<serde_json::Value, InferenceError> {
        if image.is_empty() {
            return Err(InferenceError::EmptyImage);
        }
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(InferenceError::MissingCredential);
        }

        log::debug!("📊 Image size: {} bytes", image.len());
        let prepared = self.preparer.prepare(image)?;
        log::debug!("🔄 Prepared image: {} ({} bytes base64)", prepared.media_type, prepared.data.len());

        let request = self.build_request(prepared, variant);
        log::info!("🤖 Sending request to Claude with model: {} ({:?} prompt)", self.model, variant);

        let round_trip = async {
            let response = self
                .client
                .post(&self.api_url)
                .header("x-api-key", credential)
                .header("Content-Type", "application/json")
                .header("anthropic-version", &self.api_version)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            log::debug!("📥 Claude response status: {}", status);

            let body = response.text().await?;
            Ok::<_, InferenceError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| {
                log::error!("⏱️ Claude request timed out after {:?}", self.timeout);
                InferenceError::Timeout(self.timeout)
            })??;

        if !status.is_success() {
            log::error!("❌ Claude API error response ({}): {}", status, body);
            return Err(InferenceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("📄 Raw Claude response size: {} bytes", body.len());
        serde_json::from_str(&body).map_err(|e| InferenceError::InvalidResponse(e.to_string()))
    }
}

/// First text block of a Messages API reply.
fn completion_text(body: serde_json::Value) -> Result<RawCompletion, InferenceError> {
    let response: MessagesResponse =
        serde_json::from_value(body).map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

    response
        .content
        .into_iter()
        .find(|block| block.block_type == "text")
        .and_then(|block| block.text)
        .map(RawCompletion)
        .ok_or_else(|| InferenceError::InvalidResponse("no text content in response".to_string()))
}

#[async_trait::async_trait]
impl InferenceService for AnthropicClient {
    async fn submit(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
    ) -> Result<RawCompletion, InferenceError> {
        let body = self.send(image, credential, variant).await?;
        let completion = completion_text(body)?;
        log::info!("💬 Claude response content: {}", completion.as_str());
        Ok(completion)
    }

    async fn forward(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
    ) -> Result<serde_json::Value, InferenceError> {
        self.send(image, credential, variant).await
    }
}
