use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::PromptVariant;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Runtime configuration, read from the environment (`.env` supported).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_version: String,
    pub prompt_variant: PromptVariant,
    pub request_timeout: Duration,
    pub max_encoded_image_bytes: usize,
    pub max_image_dimension: u32,
    pub daily_calorie_goal: f64,
    pub credential_store_path: PathBuf,
    pub server_addr: String,
    pub body_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 300,
            api_version: DEFAULT_API_VERSION.to_string(),
            prompt_variant: PromptVariant::Template,
            request_timeout: Duration::from_secs(60),
            max_encoded_image_bytes: 500_000,
            max_image_dimension: 1024,
            daily_calorie_goal: 2000.0,
            credential_store_path: PathBuf::from("./data/credentials.json"),
            server_addr: "0.0.0.0:8080".to_string(),
            body_limit_bytes: 10 * 1024 * 1024, // 10mb
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build from an explicit variable map (useful for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let text = |key: &str, default: String| -> String {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let prompt_variant = match vars.get("PROMPT_VARIANT") {
            Some(v) => v.parse::<PromptVariant>()?,
            None => defaults.prompt_variant,
        };

        let timeout_secs: u64 = parse_var(vars, "REQUEST_TIMEOUT_SECS", defaults.request_timeout.as_secs())?;
        if timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        let max_image_dimension = parse_var(vars, "MAX_IMAGE_DIMENSION", defaults.max_image_dimension)?;
        if max_image_dimension == 0 {
            anyhow::bail!("MAX_IMAGE_DIMENSION must be greater than zero");
        }

        Ok(Self {
            api_url: text("ANTHROPIC_API_URL", defaults.api_url),
            model: text("ANTHROPIC_MODEL", defaults.model),
            max_tokens: parse_var(vars, "ANTHROPIC_MAX_TOKENS", defaults.max_tokens)?,
            api_version: text("ANTHROPIC_VERSION", defaults.api_version),
            prompt_variant,
            request_timeout: Duration::from_secs(timeout_secs),
            max_encoded_image_bytes: parse_var(vars, "MAX_ENCODED_IMAGE_BYTES", defaults.max_encoded_image_bytes)?,
            max_image_dimension,
            daily_calorie_goal: parse_var(vars, "DAILY_CALORIE_GOAL", defaults.daily_calorie_goal)?,
            credential_store_path: PathBuf::from(text(
                "CREDENTIAL_STORE_PATH",
                defaults.credential_store_path.display().to_string(),
            )),
            server_addr: text("SERVER_ADDR", defaults.server_addr),
            body_limit_bytes: parse_var(vars, "BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
        })
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 300);
        assert_eq!(config.max_encoded_image_bytes, 500_000);
        assert_eq!(config.prompt_variant, PromptVariant::Template);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("ANTHROPIC_MODEL", "claude-3-haiku-20240307"),
            ("ANTHROPIC_MAX_TOKENS", "512"),
            ("PROMPT_VARIANT", "detailed"),
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("DAILY_CALORIE_GOAL", "1800"),
            ("SERVER_ADDR", "127.0.0.1:3000"),
        ]))
        .unwrap();

        assert_eq!(config.model, "claude-3-haiku-20240307");
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.prompt_variant, PromptVariant::Detailed);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.daily_calorie_goal, 1800.0);
        assert_eq!(config.server_addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = Config::from_vars(&vars(&[("ANTHROPIC_MODEL", "  "), ("MAX_IMAGE_DIMENSION", "")])).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_image_dimension, 1024);
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let err = Config::from_vars(&vars(&[("ANTHROPIC_MAX_TOKENS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_MAX_TOKENS"));

        assert!(Config::from_vars(&vars(&[("REQUEST_TIMEOUT_SECS", "0")])).is_err());
        assert!(Config::from_vars(&vars(&[("PROMPT_VARIANT", "poetic")])).is_err());
    }
}
