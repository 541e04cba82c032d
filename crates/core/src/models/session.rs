//! Session model and token generation

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

/// Identity carried inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
}

/// The authenticated, time-bounded client state.
///
/// Serialized exactly as the persisted cross-tab record:
/// `{access_token, user, created_at, expires_at, last_activity}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: SessionUser,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(token: String, user: SessionUser, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            access_token: token,
            user,
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
        }
    }

    /// A session past its expiry is never valid, regardless of storage.
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    /// Whole minutes until expiry, clamped at zero.
    pub fn time_until_expiry(&self) -> i64 {
        let remaining_ms = (self.expires_at - Utc::now()).num_milliseconds();
        (remaining_ms / 60_000).max(0)
    }
}

/// Opaque random token: 32 bytes of OS entropy, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Claims embedded in the token-based session variant.
///
/// Deliberately unsigned base64 JSON; the engine re-validates the user
/// against the backend by id on restore instead of trusting the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub timestamp: i64,
}

impl TokenClaims {
    pub fn for_user(user: &SessionUser) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn encode(&self) -> String {
        // serde_json never fails on this shape
        STANDARD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(token: &str) -> Option<TokenClaims> {
        let bytes = STANDARD.decode(token).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
