//! HomeSense Core Library
//!
//! Session lifecycle, permission resolution, resource-hierarchy access
//! and navigation guarding for the HomeSense platform.

pub mod auth;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod guard;
pub mod hierarchy;
pub mod models;
pub mod notify;
pub mod permissions;
pub mod session;

#[cfg(test)]
mod scenarios;

pub use auth::{hash_password, verify_password, Engine, PasswordExpiry};
pub use backend::{MemoryBackend, Row, TableBackend};
pub use config::{SessionConfig, TokenFormat, DEFAULT_STORAGE_KEY};
pub use error::{Error, Result};
pub use guard::{GuardDecision, LandingReason, RouteGuard, RouteMeta};
pub use hierarchy::HierarchyResolver;
pub use models::*;
pub use notify::{Notification, Notifier, NullNotifier};
pub use permissions::{EffectiveSet, PermissionResolver};
pub use session::{
    run_expiry_watch, MemorySessionStorage, SessionEvent, SessionStorage, SessionStore,
    SqliteSessionStorage,
};
