use anyhow::{Context, Result};

use super::KeyStore;

/// Resolves secrets from process environment variables.
///
/// The reference is the variable name, e.g. `NTA_API_KEY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvKeyStore;

#[async_trait::async_trait]
impl KeyStore for EnvKeyStore {
    async fn get(&self, reference: &str) -> Result<String> {
        let value = std::env::var(reference)
            .with_context(|| format!("Environment variable '{reference}' is not set"))?;
        if value.trim().is_empty() {
            anyhow::bail!("Environment variable '{reference}' is empty");
        }
        Ok(value)
    }
}
