use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::anthropic::InferenceError;
use crate::models::RawCompletion;

/// Which instruction prompt accompanies the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVariant {
    /// Short instruction carrying an example fragment for the model to fill in.
    #[default]
    Template,
    /// Step by step instructions, asks for exactly one JSON object.
    Detailed,
}

impl PromptVariant {
    pub fn prompt(&self) -> &'static str {
        match self {
            PromptVariant::Template => {
                "Bu yiyeceği tanımla ve cevabını şu formatta ver: \
                 {\"detectedFood\":\"yemek_adi\",\"calories\":250,\"confidence\":85,\
                 \"protein\":15,\"carbs\":30,\"fat\":10,\"advice\":\"öneri\"}"
            }
            PromptVariant::Detailed => {
                "SEN BİR GIDA ANALİZİ UZMANISIN. Bu yemek resmini dikkatli incele:\n\
                 \n\
                 1. Resimdeki ana yemeği ve yan yemekleri tanı.\n\
                 2. Porsiyon büyüklüğünü görsel olarak değerlendir.\n\
                 3. Toplam kaloriyi ve protein, karbonhidrat, yağ miktarlarını (gram) tahmin et.\n\
                 4. Tanımadan ne kadar emin olduğunu 0-100 arası bir sayı ile belirt.\n\
                 5. Kısa bir beslenme önerisi yaz.\n\
                 \n\
                 CEVAP FORMATI (KESİNLİKLE TEK BİR JSON NESNESİ):\n\
                 {\"detectedFood\":\"<yemek adı>\",\"calories\":<sayı>,\"confidence\":<0-100>,\
                 \"protein\":<sayı>,\"carbs\":<sayı>,\"fat\":<sayı>,\"advice\":\"<öneri>\"}"
            }
        }
    }
}

impl std::str::FromStr for PromptVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "template" => Ok(PromptVariant::Template),
            "detailed" => Ok(PromptVariant::Detailed),
            other => anyhow::bail!("Unknown prompt variant: {}", other),
        }
    }
}

/// Trait for multimodal inference backends
#[async_trait::async_trait]
pub trait InferenceService: Send + Sync {
    /// Send one image and return the model's text reply.
    async fn submit(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
    ) -> Result<RawCompletion, InferenceError>;

    /// Send one image and return the upstream JSON body untouched.
    async fn forward(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
    ) -> Result<serde_json::Value, InferenceError>;

    /// `submit`, abandoned as soon as `cancel` fires.
    async fn submit_with_cancel(
        &self,
        image: &[u8],
        credential: &str,
        variant: PromptVariant,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion, InferenceError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            result = self.submit(image, credential, variant) => result,
        }
    }
}
