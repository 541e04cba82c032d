//! Session lifecycle
//!
//! The store owns the persisted session record exclusively: issuance,
//! validity, sliding expiry, explicit renewal, and teardown. Expiry is
//! detected lazily on every validity check and by a periodic sweep; both
//! paths clear the record and broadcast a signal other components (and
//! other tabs sharing the persisted key) react to.

mod storage;

pub use storage::{MemorySessionStorage, SessionStorage, SqliteSessionStorage};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::config::{SessionConfig, TokenFormat};
use crate::error::Result;
use crate::models::{generate_token, Session, SessionUser, TokenClaims};
use crate::notify::{Notification, Notifier};

/// Signals emitted when the session ends without an explicit local logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session passed its expiry and was cleared.
    Expired,
    /// The persisted record disappeared; another tab logged out.
    ClearedElsewhere,
}

pub struct SessionStore {
    config: SessionConfig,
    storage: Arc<dyn SessionStorage>,
    /// Serializes read-modify-write of the persisted record within this
    /// store, so the periodic sweep cannot race an in-flight touch.
    write_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    had_session: AtomicBool,
}

impl SessionStore {
    pub fn new(config: SessionConfig, storage: Arc<dyn SessionStorage>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            storage,
            write_lock: Mutex::new(()),
            events,
            had_session: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create and persist a fresh session for `user`.
    ///
    /// Persistence is a single all-or-nothing write; a failed save leaves
    /// no session behind.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn create_session(&self, user: SessionUser) -> Result<Session> {
        let token = match self.config.token_format {
            TokenFormat::Random => generate_token(),
            TokenFormat::Claims => TokenClaims::for_user(&user).encode(),
        };
        let session = Session::new(token, user, self.config.ttl());

        let _guard = self.write_lock.lock().unwrap();
        let blob = serde_json::to_string(&session)?;
        self.storage.save(&self.config.storage_key, &blob)?;
        self.had_session.store(true, Ordering::SeqCst);
        debug!(expires_at = %session.expires_at, "session created");
        Ok(session)
    }

    /// The persisted session, valid or not. A record that fails to parse
    /// is treated as an irrecoverable load failure and cleared.
    pub fn current_session(&self) -> Option<Session> {
        let blob = self.storage.load(&self.config.storage_key).ok()??;
        match serde_json::from_str(&blob) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(%err, "discarding unreadable session record");
                let _ = self.storage.clear(&self.config.storage_key);
                None
            }
        }
    }

    /// True iff a persisted session exists and has not expired.
    ///
    /// An expired record found here is cleared immediately and the
    /// expiry signal is broadcast (lazy detection).
    pub fn is_valid(&self) -> bool {
        match self.current_session() {
            Some(session) if session.is_valid() => true,
            Some(_) => {
                self.expire();
                false
            }
            None => false,
        }
    }

    /// Current user, refreshing activity, when the session is valid.
    pub fn current_user(&self) -> Option<SessionUser> {
        if !self.is_valid() {
            return None;
        }
        self.touch();
        self.current_session().map(|s| s.user)
    }

    /// Record activity on a successful authenticated call. Sliding
    /// configurations also push the expiry forward.
    pub fn touch(&self) {
        let _guard = self.write_lock.lock().unwrap();
        let Some(mut session) = self.load_locked() else {
            return;
        };
        if !session.is_valid() {
            return;
        }
        let now = Utc::now();
        session.last_activity = now;
        if self.config.sliding {
            session.expires_at = now + self.config.ttl();
        }
        self.save_locked(&session);
    }

    /// Explicit renewal. Returns false when no valid session exists.
    pub fn extend(&self, hours: i64) -> bool {
        let _guard = self.write_lock.lock().unwrap();
        let Some(mut session) = self.load_locked() else {
            return false;
        };
        if !session.is_valid() {
            return false;
        }
        let now = Utc::now();
        session.expires_at = now + Duration::hours(hours);
        session.last_activity = now;
        self.save_locked(&session)
    }

    /// Remove all session state. Idempotent.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap();
        let _ = self.storage.clear(&self.config.storage_key);
        self.had_session.store(false, Ordering::SeqCst);
    }

    /// Whole minutes until expiry; 0 when absent or already expired.
    pub fn time_until_expiry(&self) -> i64 {
        self.current_session()
            .map(|s| s.time_until_expiry())
            .unwrap_or(0)
    }

    /// One pass of expiry detection, as run by the periodic watcher.
    ///
    /// Returns the event it observed, if any. Safe to run concurrently
    /// with ordinary calls; overlapping sweeps are idempotent.
    pub fn sweep(&self) -> Option<SessionEvent> {
        match self.current_session() {
            Some(session) if session.is_valid() => {
                self.had_session.store(true, Ordering::SeqCst);
                None
            }
            Some(_) => {
                self.expire();
                Some(SessionEvent::Expired)
            }
            None => {
                // Record gone without us clearing it: another tab did.
                if self.had_session.swap(false, Ordering::SeqCst) {
                    let _ = self.events.send(SessionEvent::ClearedElsewhere);
                    Some(SessionEvent::ClearedElsewhere)
                } else {
                    None
                }
            }
        }
    }

    fn expire(&self) {
        debug!("session expired");
        self.clear();
        let _ = self.events.send(SessionEvent::Expired);
    }

    fn load_locked(&self) -> Option<Session> {
        let blob = self.storage.load(&self.config.storage_key).ok()??;
        serde_json::from_str(&blob).ok()
    }

    fn save_locked(&self, session: &Session) -> bool {
        let Ok(blob) = serde_json::to_string(session) else {
            return false;
        };
        self.storage.save(&self.config.storage_key, &blob).is_ok()
    }
}

/// Periodic expiry watch. Spawn on the host runtime; loops forever.
///
/// The only side effects are clearing an expired record and emitting the
/// broadcast signal plus a user-facing notification, so overlapping or
/// delayed runs are harmless.
pub async fn run_expiry_watch(store: Arc<SessionStore>, notifier: Arc<dyn Notifier>) {
    let period = std::time::Duration::from_secs(store.config().check_interval_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if store.sweep() == Some(SessionEvent::Expired) {
            notifier.notify(Notification::warning(
                "Your session has expired. Please log in again.",
            ));
        }
    }
}
