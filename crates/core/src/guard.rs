//! Navigation guard
//!
//! One decision per navigation, computed from the session store and the
//! permission resolver at decision time. The guard never errors and never
//! hard-blocks: a missing session redirects to login carrying the original
//! path, a failed permission check notifies and redirects to the landing
//! page, and an internal failure fails closed only when the route demands
//! authentication.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::Permission;
use crate::notify::{Notification, Notifier};
use crate::permissions::PermissionResolver;
use crate::session::SessionStore;

/// Static route declaration, the moral equivalent of per-route meta.
#[derive(Debug, Clone)]
pub struct RouteMeta {
    pub path: String,
    pub requires_auth: bool,
    pub guest_only: bool,
    pub required_permission: Option<Permission>,
}

impl RouteMeta {
    /// A route anyone may visit.
    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requires_auth: false,
            guest_only: false,
            required_permission: None,
        }
    }

    /// A route for signed-out visitors only (login, password reset).
    pub fn guest(path: impl Into<String>) -> Self {
        Self {
            guest_only: true,
            ..Self::public(path)
        }
    }

    /// A route behind authentication.
    pub fn authenticated(path: impl Into<String>) -> Self {
        Self {
            requires_auth: true,
            ..Self::public(path)
        }
    }

    /// Additionally demand a named permission. A permission check only
    /// makes sense for a signed-in user, so this also turns on
    /// `requires_auth`.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.requires_auth = true;
        self.required_permission = Some(permission);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingReason {
    /// An authenticated user hit a guest-only route.
    GuestOnly,
    /// The route's permission check failed; the user was notified.
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Send to the login page, remembering where the user was headed.
    RedirectToLogin { redirect: String },
    /// Soft redirect to the landing page.
    RedirectToLanding { reason: LandingReason },
}

pub struct RouteGuard {
    session: Arc<SessionStore>,
    permissions: Arc<PermissionResolver>,
    notifier: Arc<dyn Notifier>,
}

impl RouteGuard {
    pub fn new(
        session: Arc<SessionStore>,
        permissions: Arc<PermissionResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            permissions,
            notifier,
        }
    }

    /// Decide one navigation. Pure with respect to store state at call
    /// time, so racing navigations resolve the same way.
    pub async fn decide(&self, route: &RouteMeta) -> GuardDecision {
        let authenticated = self.session.is_valid();

        if route.guest_only && authenticated {
            return GuardDecision::RedirectToLanding {
                reason: LandingReason::GuestOnly,
            };
        }

        // A declared permission demands authentication even when the
        // route meta was built by hand without the auth flag.
        let needs_auth = route.requires_auth || route.required_permission.is_some();
        if needs_auth && !authenticated {
            debug!(path = %route.path, "unauthenticated, redirecting to login");
            return GuardDecision::RedirectToLogin {
                redirect: route.path.clone(),
            };
        }

        if let Some(permission) = route.required_permission {
            // The session was valid a moment ago; losing it here is the
            // internal-failure path and fails closed.
            let Some(user) = self.session.current_user() else {
                warn!(path = %route.path, "session vanished mid-decision");
                return GuardDecision::RedirectToLogin {
                    redirect: route.path.clone(),
                };
            };
            if !self
                .permissions
                .has_permission(user.id, user.role, permission)
                .await
            {
                self.notifier.notify(Notification::warning(
                    "You don't have permission to access this page",
                ));
                return GuardDecision::RedirectToLanding {
                    reason: LandingReason::PermissionDenied,
                };
            }
        }

        GuardDecision::Allow
    }
}
