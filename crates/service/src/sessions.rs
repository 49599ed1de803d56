//! Session lifecycle operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use tokmesh_core::error::{Error, Result};
use tokmesh_core::filter::{SessionFilter, SessionPage};
use tokmesh_core::limits::{
    DEFAULT_TTL_SECS, MAX_DATA_ENTRIES, MAX_DATA_KEY_LEN, MAX_DATA_VALUE_LEN,
    MAX_DEVICE_ID_LEN, MAX_METADATA_LEN, MAX_TTL_SECS, MAX_USER_ID_LEN, MIN_TTL_SECS,
    VERSION_RETRY_LIMIT,
};
use tokmesh_core::session::{Session, SessionId};
use tokmesh_core::time::now_millis;
use tokmesh_crypto::token;
use tokmesh_engine::StorageEngine;

/// Input for session creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Owning user (required)
    pub user_id: String,
    /// Device identifier
    #[serde(default)]
    pub device_id: Option<String>,
    /// Application-defined data
    #[serde(default)]
    pub data: Option<BTreeMap<String, String>>,
    /// Requested lifetime in seconds; defaults to 24 hours
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    /// Client IP, supplied by the HTTP layer
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Client user agent, supplied by the HTTP layer
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Principal creating the session (API key name)
    #[serde(default)]
    pub created_by: Option<String>,
}

/// The one response that ever carries a plaintext token.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    /// ID of the new session
    pub session_id: String,
    /// Bearer token; returned exactly once, never persisted
    pub token: String,
    /// Expiry, ms since epoch
    pub expires_at: i64,
}

/// Verdict from token validation. Callers learn validity and, for valid
/// tokens, the session identity; invalid tokens all look alike.
#[derive(Debug, Clone, Serialize)]
pub struct TokenValidation {
    /// Whether the token maps to a live session
    pub valid: bool,
    /// Session the token belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session expiry, ms since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl TokenValidation {
    fn invalid() -> Self {
        TokenValidation { valid: false, session_id: None, user_id: None, expires_at: None }
    }
}

/// Stateless façade over the storage engine.
pub struct SessionService {
    engine: Arc<StorageEngine>,
}

impl SessionService {
    /// Service over an opened engine.
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        SessionService { engine }
    }

    /// The engine behind this service.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Create a session and mint its bearer token.
    pub fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        validate_create(&request)?;
        let ttl = request.ttl_seconds.unwrap_or(DEFAULT_TTL_SECS);

        let plaintext = token::generate().map_err(|e| Error::Crypto(e.to_string()))?;
        let token_hash = token::hash(&plaintext);

        let now = now_millis();
        let id = SessionId::generate()?;
        let session = Session {
            shard_id: id.shard_id(self.engine.shard_count()),
            id,
            user_id: request.user_id,
            token_hash,
            ip_address: request.ip_address.unwrap_or_default(),
            user_agent: request.user_agent.unwrap_or_default(),
            device_id: request.device_id.unwrap_or_default(),
            created_by: request.created_by.unwrap_or_default(),
            created_at: now,
            expires_at: now + ttl.saturating_mul(1000),
            last_active: now,
            last_access_ip: String::new(),
            last_access_ua: String::new(),
            data: request.data.unwrap_or_default(),
            version: 0,
            ttl,
            is_deleted: false,
        };

        let session_id = session.id.as_str().to_string();
        let expires_at = session.expires_at;
        self.engine.create_session(session)?;
        debug!(target: "tokmesh::service", session = %session_id, "session created");

        Ok(CreateSessionResponse { session_id, token: plaintext, expires_at })
    }

    /// Fetch a live session.
    pub fn get_session(&self, id: &str) -> Result<Session> {
        let id = SessionId::parse(id)?;
        self.engine.get_session(id.as_str())
    }

    /// Extend a session's lifetime. `new_ttl` defaults to the session's
    /// existing TTL. Retries optimistic conflicts a few times before
    /// surfacing them.
    pub fn renew_session(&self, id: &str, new_ttl: Option<i64>) -> Result<Session> {
        let id = SessionId::parse(id)?;
        if let Some(ttl) = new_ttl {
            validate_ttl(ttl)?;
        }

        let mut attempt = 0;
        loop {
            let current = self.engine.get_session(id.as_str())?;
            let ttl = new_ttl.unwrap_or(current.ttl);

            let mut renewed = current.clone();
            renewed.ttl = ttl;
            renewed.expires_at = now_millis() + ttl.saturating_mul(1000);
            match self.engine.update_session(&mut renewed, current.version) {
                Ok(()) => return Ok(renewed),
                Err(e) if e.is_retryable() && attempt + 1 < VERSION_RETRY_LIMIT => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Destroy a session.
    pub fn revoke_session(&self, id: &str) -> Result<()> {
        let id = SessionId::parse(id)?;
        self.engine.delete_session(id.as_str()).map(|_| ())
    }

    /// Destroy every session of a user, returning the count removed.
    pub fn revoke_user_sessions(&self, user_id: &str) -> Result<usize> {
        if user_id.is_empty() {
            return Err(Error::InvalidArgument("user_id must not be empty".into()));
        }
        self.engine.delete_user_sessions(user_id)
    }

    /// List sessions matching the filter.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionPage<Session>> {
        self.engine.list_sessions(filter)
    }

    /// Record activity on a session.
    pub fn touch_session(&self, id: &str, ip: &str, user_agent: &str) -> Result<()> {
        let id = SessionId::parse(id)?;
        self.engine.touch_session(id.as_str(), ip, user_agent)
    }

    /// Check a bearer token against the live set.
    ///
    /// Never errors for a bad token: the caller gets `valid: false` whether
    /// the token is malformed, unknown, rotated away, or expired. `touch`
    /// additionally records the access on the session.
    pub fn validate_token(
        &self,
        presented: &str,
        touch: bool,
        ip: &str,
        user_agent: &str,
    ) -> Result<TokenValidation> {
        if !presented.starts_with(token::TOKEN_PREFIX) {
            return Ok(TokenValidation::invalid());
        }

        let hash = token::hash(presented);
        let session = match self.engine.get_session_by_token(&hash) {
            Ok(session) => session,
            Err(Error::SessionNotFound(_) | Error::SessionExpired(_)) => {
                return Ok(TokenValidation::invalid())
            }
            Err(e) => return Err(e),
        };

        if !token::verify(presented, &session.token_hash) {
            return Ok(TokenValidation::invalid());
        }

        if touch {
            // Best-effort: a session revoked mid-validation just skips the
            // activity update
            let _ = self.engine.touch_session(session.id.as_str(), ip, user_agent);
        }

        Ok(TokenValidation {
            valid: true,
            session_id: Some(session.id.as_str().to_string()),
            user_id: Some(session.user_id),
            expires_at: Some(session.expires_at),
        })
    }

    /// Run an expiry sweep now, returning how many sessions were removed.
    pub fn gc(&self) -> Result<usize> {
        self.engine.gc()
    }
}

fn validate_create(request: &CreateSessionRequest) -> Result<()> {
    if request.user_id.is_empty() {
        return Err(Error::InvalidArgument("user_id must not be empty".into()));
    }
    if request.user_id.len() > MAX_USER_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "user_id exceeds {MAX_USER_ID_LEN} bytes"
        )));
    }
    if let Some(device_id) = &request.device_id {
        if device_id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::InvalidArgument(format!(
                "device_id exceeds {MAX_DEVICE_ID_LEN} bytes"
            )));
        }
    }
    for field in [&request.ip_address, &request.user_agent, &request.created_by] {
        if let Some(value) = field {
            if value.len() > MAX_METADATA_LEN {
                return Err(Error::InvalidArgument(format!(
                    "metadata field exceeds {MAX_METADATA_LEN} bytes"
                )));
            }
        }
    }
    if let Some(ttl) = request.ttl_seconds {
        validate_ttl(ttl)?;
    }
    if let Some(data) = &request.data {
        if data.len() > MAX_DATA_ENTRIES {
            return Err(Error::InvalidArgument(format!(
                "data exceeds {MAX_DATA_ENTRIES} entries"
            )));
        }
        for (key, value) in data {
            if key.is_empty() || key.len() > MAX_DATA_KEY_LEN {
                return Err(Error::InvalidArgument("data key length out of range".into()));
            }
            if value.len() > MAX_DATA_VALUE_LEN {
                return Err(Error::InvalidArgument(format!(
                    "data value exceeds {MAX_DATA_VALUE_LEN} bytes"
                )));
            }
        }
    }
    Ok(())
}

fn validate_ttl(ttl: i64) -> Result<()> {
    if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&ttl) {
        return Err(Error::InvalidArgument(format!(
            "ttl_seconds must be within {MIN_TTL_SECS}..={MAX_TTL_SECS}"
        )));
    }
    Ok(())
}
