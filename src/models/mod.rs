use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tanınamayan yemekler için gösterilen isim
pub const UNKNOWN_FOOD: &str = "Bilinmeyen yiyecek";
/// Hata sonucunda gösterilen isim
pub const ERROR_FOOD: &str = "Analiz Hatası";

/// One upload waiting to be analyzed. Dropped once the request completes.
#[derive(Clone)]
pub struct AnalysisRequest {
    pub image: Vec<u8>,
    pub credential: String,
}

impl std::fmt::Debug for AnalysisRequest {
    // Anahtar loglara düşmesin
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("image_bytes", &self.image.len())
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Unstructured text returned by the model. May contain one JSON fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCompletion(pub String);

impl RawCompletion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawCompletion {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// Normalized nutrition result. Every field always has a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEstimate {
    pub detected_food: String,
    pub confidence: f64,  // 0-100
    pub calories: f64,
    pub protein: f64,     // gram
    pub carbs: f64,       // gram
    pub fat: f64,         // gram
    pub advice: String,
}

impl Default for NutritionEstimate {
    fn default() -> Self {
        Self {
            detected_food: UNKNOWN_FOOD.to_string(),
            confidence: 0.0,
            calories: 0.0,
            protein: 0.0,
            carbs: 0.0,
            fat: 0.0,
            advice: String::new(),
        }
    }
}

impl NutritionEstimate {
    /// Result record shown when an analysis fails: zero nutrition, message in `advice`.
    pub fn error(message: &str) -> Self {
        Self {
            detected_food: ERROR_FOOD.to_string(),
            advice: format!("Hata: {}", message),
            ..Self::default()
        }
    }
}

/// Running calorie sum for the current session. Not persisted.
#[derive(Debug, Clone)]
pub struct DailyTally {
    pub total_calories: f64,
    pub analyses: u32,
    pub started_at: DateTime<Utc>,
}

impl Default for DailyTally {
    fn default() -> Self {
        Self {
            total_calories: 0.0,
            analyses: 0,
            started_at: Utc::now(),
        }
    }
}

impl DailyTally {
    pub fn add(&mut self, estimate: &NutritionEstimate) {
        self.total_calories += estimate.calories;
        self.analyses += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Analysis progress as seen by the caller. There is no real percentage signal
/// from the upstream call, so only "in flight or not" is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Idle,
    Analyzing,
}

/// What the presentation side receives after one analysis attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub success: bool,
    pub result: NutritionEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub daily_calories: f64,
    pub summary: String,
}
