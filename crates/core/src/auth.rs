//! Login flow and engine context
//!
//! The `Engine` wires the backend, session store, resolvers and notifier
//! together behind explicit construction. Nothing here is a global;
//! hosts build one engine and hand it around.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::backend::{Row, TableBackend};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::guard::RouteGuard;
use crate::hierarchy::HierarchyResolver;
use crate::models::{Role, Session, SessionUser};
use crate::notify::Notifier;
use crate::permissions::PermissionResolver;
use crate::session::{SessionStorage, SessionStore};

/// Outcome of a password-expiry probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordExpiry {
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

pub struct Engine {
    backend: Arc<dyn TableBackend>,
    session: Arc<SessionStore>,
    permissions: Arc<PermissionResolver>,
    hierarchy: Arc<HierarchyResolver>,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn TableBackend>,
        config: SessionConfig,
        storage: Arc<dyn SessionStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(config, storage));
        let permissions = Arc::new(PermissionResolver::new(Arc::clone(&backend)));
        let hierarchy = Arc::new(HierarchyResolver::new(Arc::clone(&backend)));
        Self {
            backend,
            session,
            permissions,
            hierarchy,
            notifier,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn permissions(&self) -> &Arc<PermissionResolver> {
        &self.permissions
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyResolver> {
        &self.hierarchy
    }

    /// A guard sharing this engine's stores.
    pub fn guard(&self) -> RouteGuard {
        RouteGuard::new(
            Arc::clone(&self.session),
            Arc::clone(&self.permissions),
            Arc::clone(&self.notifier),
        )
    }

    /// Authenticate and open a session.
    ///
    /// Wrong email, wrong password, a soft-deleted account and an expired
    /// password all fail the same way. A failed login leaves no session
    /// behind. Permissions and hierarchy mappings are warmed before this
    /// returns, each falling back independently if the backend degrades
    /// mid-flight.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let rows = self
            .backend
            .query("users", &format!(r#"email=="{email}""#))
            .await?;
        let row = rows.first().ok_or(Error::InvalidCredentials)?;

        if !row
            .get("deleted_at")
            .map_or(true, serde_json::Value::is_null)
        {
            debug!("rejecting soft-deleted account");
            return Err(Error::InvalidCredentials);
        }

        let stored = row
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or(Error::InvalidCredentials)?;
        if !verify_password(stored, password) {
            return Err(Error::InvalidCredentials);
        }

        if password_expired(row, Utc::now()) {
            debug!("rejecting expired password");
            return Err(Error::InvalidCredentials);
        }

        let user = session_user(row)?;
        let user_id = user.id;
        let role = user.role;

        self.permissions.invalidate(user_id);
        self.hierarchy.invalidate(user_id);
        let session = self.session.create_session(user)?;

        // Best effort; a missed timestamp never fails a login.
        if let Err(err) = self
            .backend
            .patch("users", json!({"id": user_id, "last_sign_in_at": Utc::now()}))
            .await
        {
            warn!(%err, "could not record last sign-in");
        }

        let (permissions, mappings) = tokio::join!(
            self.permissions.load_permissions(user_id, role),
            self.hierarchy.mappings(user_id),
        );
        if let Err(err) = permissions {
            warn!(%err, "permission warm-up failed");
        }
        if let Err(err) = mappings {
            warn!(%err, "mapping warm-up failed");
        }

        Ok(session)
    }

    /// Drop the session and every cached resolution. Local only; always
    /// succeeds.
    pub fn logout(&self) {
        if let Some(user) = self.session.current_session().map(|s| s.user) {
            self.permissions.invalidate(user.id);
            self.hierarchy.invalidate(user.id);
        } else {
            self.permissions.invalidate_all();
            self.hierarchy.invalidate_all();
        }
        self.session.clear();
        debug!("logged out");
    }

    /// Re-validate a persisted session on startup.
    ///
    /// The stored record is not taken at face value: the user must still
    /// exist and be live in the backend. Any mismatch clears the session.
    /// An unreachable backend keeps the session rather than logging the
    /// user out over a network blip.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<Option<SessionUser>> {
        if !self.session.is_valid() {
            return Ok(None);
        }
        let Some(session) = self.session.current_session() else {
            return Ok(None);
        };
        let user = session.user;

        let rows = match self
            .backend
            .query("users", &format!(r#"id=="{}""#, user.id))
            .await
        {
            Ok(rows) => rows,
            Err(Error::BackendUnavailable(reason)) => {
                warn!(%reason, "restore deferred, backend unreachable");
                return Ok(Some(user));
            }
            Err(err) => return Err(err),
        };

        let live = rows.first().is_some_and(|row| {
            row.get("deleted_at").map_or(true, serde_json::Value::is_null)
                && row.get("email").and_then(|v| v.as_str()) == Some(user.email.as_str())
        });
        if !live {
            debug!("persisted session no longer matches a live account");
            self.logout();
            return Ok(None);
        }

        self.permissions.invalidate(user.id);
        if let Err(err) = self.permissions.load_permissions(user.id, user.role).await {
            warn!(%err, "permission reload failed during restore");
        }
        self.session.touch();
        Ok(Some(user))
    }

    pub fn extend_session(&self, hours: i64) -> bool {
        self.session.extend(hours)
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.session.current_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_valid()
    }

    /// Read the account's password deadline.
    pub async fn check_password_expiry(&self, user_id: Uuid) -> Result<PasswordExpiry> {
        let rows = self
            .backend
            .query("users", &format!(r#"id=="{user_id}""#))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        let expires_at = row
            .get("password_expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());
        Ok(PasswordExpiry {
            expires_at,
            expired: expires_at.is_some_and(|at| at <= Utc::now()),
        })
    }

    /// Push the account's password deadline `hours` into the future.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn extend_password_expiry(&self, user_id: Uuid, hours: i64) -> Result<()> {
        let deadline = Utc::now() + Duration::hours(hours);
        self.backend
            .patch(
                "users",
                json!({"id": user_id, "password_expires_at": deadline}),
            )
            .await?;
        Ok(())
    }
}

/// Verify a credential against its stored form.
///
/// Stored values that parse as an Argon2 PHC string are verified as
/// hashes; anything else is compared directly (legacy rows hold the
/// plaintext).
pub fn verify_password(stored: &str, given: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(given.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => stored == given,
    }
}

/// Hash a new credential for storage.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| Error::InvalidOperation(format!("password hashing failed: {err}")))?;
    Ok(hash.to_string())
}

fn password_expired(row: &Row, now: DateTime<Utc>) -> bool {
    row.get("password_expires_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .is_some_and(|at| at <= now)
}

fn session_user(row: &Row) -> Result<SessionUser> {
    let id = row
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| Error::InvalidOperation("user row without an id".into()))?;
    let email = row
        .get("email")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidOperation("user row without an email".into()))?
        .to_string();
    let role = row
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::from_name)
        .ok_or_else(|| Error::InvalidOperation("user row without a known role".into()))?;
    let role_id = row
        .get("role_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    Ok(SessionUser {
        id,
        email,
        role,
        role_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::notify::NullNotifier;
    use crate::session::MemorySessionStorage;

    fn engine() -> (Arc<MemoryBackend>, Engine) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = Engine::new(
            Arc::clone(&backend) as Arc<dyn TableBackend>,
            SessionConfig::lightweight(),
            Arc::new(MemorySessionStorage::new()),
            Arc::new(NullNotifier),
        );
        (backend, engine)
    }

    fn seed_user(backend: &MemoryBackend, email: &str, password: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        backend.push(
            "users",
            json!({"id": id, "email": email, "password": password, "role": role}),
        );
        id
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let (backend, engine) = engine();
        let id = seed_user(&backend, "admin@x.com", "secret", "System Admin");

        let session = engine.login("admin@x.com", "secret").await.unwrap();
        assert_eq!(session.user.id, id);
        assert_eq!(session.user.role, Role::SystemAdmin);
        assert!(engine.is_authenticated());
        // last sign-in was patched
        assert!(backend.rows("users")[0]["last_sign_in_at"].is_string());
    }

    #[tokio::test]
    async fn test_login_verifies_argon2_hash() {
        let (backend, engine) = engine();
        let hash = hash_password("secret").unwrap();
        seed_user(&backend, "user@x.com", &hash, "Caregiver");

        assert!(engine.login("user@x.com", "wrong").await.is_err());
        engine.login("user@x.com", "secret").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failures_leave_no_session() {
        let (backend, engine) = engine();
        seed_user(&backend, "user@x.com", "secret", "Caregiver");

        for (email, password) in [
            ("nobody@x.com", "secret"),
            ("user@x.com", "wrong"),
        ] {
            let err = engine.login(email, password).await.unwrap_err();
            assert!(matches!(err, Error::InvalidCredentials));
            assert!(!engine.is_authenticated());
        }
    }

    #[tokio::test]
    async fn test_soft_deleted_account_rejected() {
        let (backend, engine) = engine();
        backend.push(
            "users",
            json!({
                "id": Uuid::new_v4(),
                "email": "gone@x.com",
                "password": "secret",
                "role": "Caregiver",
                "deleted_at": "2025-05-01T00:00:00Z",
            }),
        );
        assert!(engine.login("gone@x.com", "secret").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_password_rejected() {
        let (backend, engine) = engine();
        backend.push(
            "users",
            json!({
                "id": Uuid::new_v4(),
                "email": "stale@x.com",
                "password": "secret",
                "role": "Caregiver",
                "password_expires_at": "2025-01-01T00:00:00Z",
            }),
        );
        let err = engine.login("stale@x.com", "secret").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (backend, engine) = engine();
        seed_user(&backend, "user@x.com", "secret", "Caregiver");
        engine.login("user@x.com", "secret").await.unwrap();

        engine.logout();
        assert!(!engine.is_authenticated());
        assert!(engine.current_user().is_none());
        // idempotent
        engine.logout();
    }

    #[tokio::test]
    async fn test_restore_revalidates_against_backend() {
        let (backend, engine) = engine();
        seed_user(&backend, "user@x.com", "secret", "Caregiver");
        engine.login("user@x.com", "secret").await.unwrap();

        let restored = engine.restore().await.unwrap();
        assert_eq!(restored.unwrap().email, "user@x.com");

        // account disappears behind our back
        let row = backend.rows("users")[0].clone();
        backend.delete("users", row).await.unwrap();
        assert!(engine.restore().await.unwrap().is_none());
        assert!(!engine.is_authenticated());
    }

    #[tokio::test]
    async fn test_restore_survives_backend_outage() {
        let (backend, engine) = engine();
        seed_user(&backend, "user@x.com", "secret", "Caregiver");
        engine.login("user@x.com", "secret").await.unwrap();

        backend.set_offline(true);
        let restored = engine.restore().await.unwrap();
        assert!(restored.is_some());
        assert!(engine.is_authenticated());
    }

    #[tokio::test]
    async fn test_password_expiry_roundtrip() {
        let (backend, engine) = engine();
        let id = seed_user(&backend, "user@x.com", "secret", "Caregiver");

        let probe = engine.check_password_expiry(id).await.unwrap();
        assert!(!probe.expired);
        assert!(probe.expires_at.is_none());

        engine.extend_password_expiry(id, 24).await.unwrap();
        let probe = engine.check_password_expiry(id).await.unwrap();
        assert!(!probe.expired);
        assert!(probe.expires_at.is_some());
    }

    #[test]
    fn test_verify_password_fallback() {
        assert!(verify_password("plaintext", "plaintext"));
        assert!(!verify_password("plaintext", "other"));
    }
}
