pub mod ai_service; // Inference trait + prompt variants
pub mod anthropic; // Anthropic Messages API
pub mod credentials;
pub mod extractor;
pub mod photo; // Upload decoding + downscaling

pub use ai_service::{InferenceService, PromptVariant};
pub use anthropic::{AnthropicClient, InferenceError};
pub use credentials::{
    ChainedCredentialProvider, CredentialProvider, EnvCredentialProvider, FileCredentialStore,
};
#[cfg(test)]
pub use credentials::StaticCredential;
