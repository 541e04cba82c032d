//! Session configuration
//!
//! Two deployed variants exist: a lightweight session with a short sliding
//! TTL and an opaque random token, and a token-based session with a long
//! fixed TTL carrying base64 claims. Both are kept configurable here.

use serde::{Deserialize, Serialize};

/// Storage key shared by every tab reading the same persisted session.
pub const DEFAULT_STORAGE_KEY: &str = "KeePAlive-TopSense2025-Ssession";

const DEFAULT_TTL_MINUTES: i64 = 30;
const TOKEN_BASED_TTL_MINUTES: i64 = 8 * 60;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// How the access token is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenFormat {
    /// 32 bytes of OS entropy, URL-safe base64.
    #[default]
    Random,
    /// Unsigned base64 JSON claims (`{user_id, email, role, timestamp}`).
    Claims,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in minutes.
    #[serde(default = "default_ttl")]
    pub ttl_minutes: i64,
    /// Push `expires_at` forward on every successful authenticated call.
    #[serde(default = "default_sliding")]
    pub sliding: bool,
    /// Period of the background expiry check.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Key the persisted session record lives under.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub token_format: TokenFormat,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_MINUTES
}

fn default_sliding() -> bool {
    true
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::lightweight()
    }
}

impl SessionConfig {
    /// 30-minute sliding session with an opaque random token.
    pub fn lightweight() -> Self {
        Self {
            ttl_minutes: DEFAULT_TTL_MINUTES,
            sliding: true,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            storage_key: default_storage_key(),
            token_format: TokenFormat::Random,
        }
    }

    /// 8-hour fixed session with a claims token.
    pub fn token_based() -> Self {
        Self {
            ttl_minutes: TOKEN_BASED_TTL_MINUTES,
            sliding: false,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            storage_key: default_storage_key(),
            token_format: TokenFormat::Claims,
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ttl_minutes)
    }
}
