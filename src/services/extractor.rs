//! Pulls the JSON fragment out of the model's free-text reply and normalizes it
//! into a [`NutritionEstimate`].
//!
//! Fragment policy: the shortest balanced `{...}` span starting at the first
//! `{` of the reply. Braces inside JSON string literals are not counted.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{NutritionEstimate, RawCompletion, UNKNOWN_FOOD};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("no structured data in model response")]
    NoStructuredData,

    #[error("malformed structured data: {reason}")]
    MalformedData { fragment: String, reason: String },
}

/// Extract and normalize the nutrition fragment embedded in `raw`.
pub fn extract(raw: &RawCompletion) -> Result<NutritionEstimate, ExtractionError> {
    let fragment = find_fragment(raw.as_str())?;

    let decoded: Value = serde_json::from_str(fragment).map_err(|e| {
        log::error!("❌ Structured fragment could not be decoded: {}", e);
        ExtractionError::MalformedData {
            fragment: fragment.to_string(),
            reason: e.to_string(),
        }
    })?;

    let fields = match decoded {
        Value::Object(fields) => fields,
        other => {
            return Err(ExtractionError::MalformedData {
                fragment: fragment.to_string(),
                reason: format!("expected an object, found {}", other),
            })
        }
    };

    let estimate = NutritionEstimate {
        detected_food: text_field(&fields, "detectedFood")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_FOOD.to_string()),
        confidence: number_field(&fields, "confidence").clamp(0.0, 100.0),
        calories: number_field(&fields, "calories"),
        protein: number_field(&fields, "protein"),
        carbs: number_field(&fields, "carbs"),
        fat: number_field(&fields, "fat"),
        advice: text_field(&fields, "advice").unwrap_or_default(),
    };

    log::debug!(
        "✅ Extracted estimate: {} ({} kcal, confidence {})",
        estimate.detected_food,
        estimate.calories,
        estimate.confidence
    );

    Ok(estimate)
}

/// Locate the first balanced brace span in `text`.
fn find_fragment(text: &str) -> Result<&str, ExtractionError> {
    let start = text.find('{').ok_or(ExtractionError::NoStructuredData)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    // Açılan süslü parantez hiç kapanmadı (yanıt yarıda kesilmiş)
    let truncated = &text[start..];
    Err(ExtractionError::MalformedData {
        fragment: truncated.to_string(),
        reason: "fragment is not closed".to_string(),
    })
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers pass through; strings like "320", "14g", "1,250 kcal" or "12,5" are
/// read up to the first character that cannot continue the number. Anything
/// else is 0.
fn number_field(fields: &Map<String, Value>, key: &str) -> f64 {
    let value = match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_leading_number(s),
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() => v,
        _ => {
            if fields.contains_key(key) {
                log::warn!("⚠️ Non-numeric value for '{}', using 0", key);
            }
            0.0
        }
    }
}

fn parse_leading_number(s: &str) -> Option<f64> {
    let chars: Vec<char> = s.trim().chars().collect();
    let mut cleaned = String::new();
    let mut seen_decimal = false;
    let mut i = 0;

    // Eksi işareti yalnızca başta
    if chars.first() == Some(&'-') {
        cleaned.push('-');
        i = 1;
    }

    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() => cleaned.push(c),
            '.' if !seen_decimal => {
                seen_decimal = true;
                cleaned.push('.');
            }
            ',' if !seen_decimal => {
                let digits = chars[i + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
                match digits {
                    // 1,250 -> binlik ayırıcı
                    3 => {}
                    0 => break,
                    // 12,5 -> ondalık virgül
                    _ => {
                        seen_decimal = true;
                        cleaned.push('.');
                    }
                }
            }
            _ => break,
        }
        i += 1;
    }

    cleaned.parse::<f64>().ok()
}
