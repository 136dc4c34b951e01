use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key under which the API key is stored
pub const CREDENTIAL_KEY: &str = "claude_api_key";

/// Supplies the API key used for upstream calls.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Option<String>>;
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// File-backed store: a small JSON object keyed by [`CREDENTIAL_KEY`].
pub struct FileCredentialStore {
    path: PathBuf,
    // okuma/yazma sırasını korumak için
    lock: tokio::sync::Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Credential file {} is not valid JSON", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write_entries(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub async fn load(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await?;
        Ok(non_blank(
            entries.get(CREDENTIAL_KEY).and_then(|v| v.as_str()).map(str::to_string),
        ))
    }

    pub async fn save(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("API key must not be empty");
        }

        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(CREDENTIAL_KEY.to_string(), Value::String(key.to_string()));
        self.write_entries(&entries).await?;

        log::info!("🔑 API key saved to {}", self.path.display());
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(CREDENTIAL_KEY).is_some() {
            self.write_entries(&entries).await?;
            log::info!("🧹 API key removed from {}", self.path.display());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialProvider for FileCredentialStore {
    async fn credential(&self) -> Result<Option<String>> {
        self.load().await
    }
}

/// Reads the key from an environment variable.
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("ANTHROPIC_API_KEY")
    }
}

#[async_trait::async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credential(&self) -> Result<Option<String>> {
        Ok(non_blank(std::env::var(&self.var).ok()))
    }
}

/// Fixed key for tests.
#[cfg(test)]
pub struct StaticCredential(pub Option<String>);

#[cfg(test)]
#[async_trait::async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<Option<String>> {
        Ok(non_blank(self.0.clone()))
    }
}

/// Asks each provider in order; the first key found wins.
pub struct ChainedCredentialProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainedCredentialProvider {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for ChainedCredentialProvider {
    async fn credential(&self) -> Result<Option<String>> {
        for provider in &self.providers {
            match provider.credential().await {
                Ok(Some(key)) => return Ok(Some(key)),
                Ok(None) => {}
                Err(e) => log::warn!("⚠️ Credential provider failed, trying next: {}", e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/credentials.json"));

        assert_eq!(store.load().await.unwrap(), None);

        store.save("  sk-ant-api-123 ").await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some("sk-ant-api-123".to_string()));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[CREDENTIAL_KEY], "sk-ant-api-123");

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_keeps_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        store.save("key").await.unwrap();
        store.clear().await.unwrap();

        let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["theme"], "dark");
        assert!(json.get(CREDENTIAL_KEY).is_none());
    }

    #[tokio::test]
    async fn test_store_rejects_blank_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));

        assert!(store.save("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(FileCredentialStore::new(&path).load().await.is_err());
    }

    #[tokio::test]
    async fn test_chain_falls_through() {
        let providers: Vec<Arc<dyn CredentialProvider>> = vec![
            Arc::new(StaticCredential(None)),
            Arc::new(StaticCredential(Some("   ".to_string()))),
            Arc::new(StaticCredential(Some("second".to_string()))),
        ];
        let chain = ChainedCredentialProvider::new(providers);

        assert_eq!(chain.credential().await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn test_chain_skips_failing_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{broken").unwrap();

        let providers: Vec<Arc<dyn CredentialProvider>> = vec![
            Arc::new(FileCredentialStore::new(&path)),
            Arc::new(StaticCredential(Some("fallback".to_string()))),
        ];
        let chain = ChainedCredentialProvider::new(providers);

        assert_eq!(chain.credential().await.unwrap(), Some("fallback".to_string()));
    }

    #[tokio::test]
    async fn test_env_provider_missing_var() {
        let provider = EnvCredentialProvider::new("CALORIAI_TEST_UNSET_KEY_VAR");
        assert_eq!(provider.credential().await.unwrap(), None);
    }
}
