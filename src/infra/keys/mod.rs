//! API-key management.
//!
//! [`KeyStore`] is the async trait for resolving a reference into its plaintext value.
//! [`EnvKeyStore`] implements [`KeyStore`] by reading environment variables
//! (populated from `.env` by `dotenvy` at startup).

mod env;

pub use env::EnvKeyStore;

use anyhow::Result;

use crate::config::SourceConfig;

/// Resolves a vault reference (e.g. an environment variable name) into a plaintext secret.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, reference: &str) -> Result<String>;
}

/// Resolves the API key for `source`, if its auth scheme needs one.
///
/// Returns `Ok(None)` for unauthenticated sources.
pub async fn resolve_key<K: KeyStore + ?Sized>(
    store: &K,
    source: &SourceConfig,
) -> Result<Option<String>> {
    if !source.auth.requires_auth() {
        return Ok(None);
    }
    let reference = source
        .key_env
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Source '{}' requires auth but has no key_env", source.url))?;
    Ok(Some(store.get(reference).await?))
}
