//! API key store.
//!
//! The core holds key metadata and secret hashes; minting returns the
//! secret exactly once. Enforcing roles on requests is the HTTP
//! collaborator's job, through the [`ApiKeyStore`] interface.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use tokmesh_concurrency::ShardedMap;
use tokmesh_core::apikey::{ApiKey, ApiKeyRole, API_KEY_ID_PREFIX};
use tokmesh_core::config::encode_hex;
use tokmesh_core::error::{Error, Result};
use tokmesh_core::time::now_millis;
use tokmesh_crypto::token;

/// A freshly minted key: metadata plus the one-time secret.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    /// Stored metadata
    pub key: ApiKey,
    /// Plaintext secret; shown once, never persisted
    pub secret: String,
}

/// Interface the request-authentication collaborator binds to.
pub trait ApiKeyStore: Send + Sync {
    /// Mint a new key with the given label and role.
    fn create(&self, name: &str, role: ApiKeyRole) -> Result<CreatedApiKey>;
    /// Fetch key metadata.
    fn get(&self, key_id: &str) -> Result<ApiKey>;
    /// Verify a presented secret, recording the use. Disabled keys and
    /// wrong secrets fail identically.
    fn verify(&self, key_id: &str, secret: &str) -> Result<ApiKey>;
    /// All keys, unordered.
    fn list(&self) -> Vec<ApiKey>;
    /// Enable or disable a key.
    fn set_enabled(&self, key_id: &str, enabled: bool) -> Result<ApiKey>;
    /// Remove a key.
    fn delete(&self, key_id: &str) -> Result<()>;
}

/// In-memory key store over the sharded map. API keys are few and
/// administrative; they ride the same storage primitive as everything else
/// but are not written to the session WAL.
pub struct MemoryApiKeyStore {
    keys: ShardedMap<String, ApiKey>,
}

impl MemoryApiKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        MemoryApiKeyStore { keys: ShardedMap::new() }
    }

    /// Store seeded with existing keys (e.g. from a config file).
    pub fn with_keys(existing: Vec<ApiKey>) -> Self {
        let store = Self::new();
        for key in existing {
            store.keys.set(key.key_id.clone(), key);
        }
        store
    }
}

impl Default for MemoryApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStore for MemoryApiKeyStore {
    fn create(&self, name: &str, role: ApiKeyRole) -> Result<CreatedApiKey> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("key name must not be empty".into()));
        }

        let mut raw = [0u8; 6];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|e| Error::Crypto(format!("csprng failure: {e}")))?;
        let key_id = format!("{API_KEY_ID_PREFIX}{}", encode_hex(&raw));

        let secret = token::generate().map_err(|e| Error::Crypto(e.to_string()))?;
        let key = ApiKey {
            key_id: key_id.clone(),
            secret_hash: token::hash(&secret),
            name: name.to_string(),
            role,
            enabled: true,
            created_at: now_millis(),
            last_used_at: 0,
        };

        if !self.keys.set_if_absent(key_id.clone(), key.clone()) {
            return Err(Error::ApiKeyConflict(key_id));
        }
        info!(target: "tokmesh::service", key = %key.key_id, role = ?role, "api key created");
        Ok(CreatedApiKey { key, secret })
    }

    fn get(&self, key_id: &str) -> Result<ApiKey> {
        self.keys
            .get(&key_id.to_string())
            .ok_or_else(|| Error::ApiKeyNotFound(key_id.to_string()))
    }

    fn verify(&self, key_id: &str, secret: &str) -> Result<ApiKey> {
        let key = self.get(key_id)?;
        // Disabled and mismatched secrets take the same path out
        if !key.enabled || !token::verify(secret, &key.secret_hash) {
            return Err(Error::ApiKeyNotFound(key_id.to_string()));
        }
        let now = now_millis();
        self.keys
            .update_in_place(&key_id.to_string(), |key| key.last_used_at = now);
        Ok(key)
    }

    fn list(&self) -> Vec<ApiKey> {
        self.keys.entries().into_iter().map(|(_, key)| key).collect()
    }

    fn set_enabled(&self, key_id: &str, enabled: bool) -> Result<ApiKey> {
        let updated = self
            .keys
            .update_in_place(&key_id.to_string(), |key| key.enabled = enabled);
        if !updated {
            return Err(Error::ApiKeyNotFound(key_id.to_string()));
        }
        self.get(key_id)
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        if self.keys.delete(&key_id.to_string()) {
            Ok(())
        } else {
            Err(Error::ApiKeyNotFound(key_id.to_string()))
        }
    }
}
