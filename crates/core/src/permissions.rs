//! Permission resolution
//!
//! Effective permissions are the union of role-derived grants and
//! user-specific rows, with explicit revocations (`granted == false`)
//! taking precedence over everything a role would allow. Results are
//! cached per user until invalidated by login, logout, or an update.
//! When the backend cannot be reached the resolver falls back to the
//! built-in role catalog so a signed-in user is never stripped to an
//! empty set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::backend::{Row, TableBackend};
use crate::catalog;
use crate::error::{Error, Result};
use crate::hierarchy::HierarchyResolver;
use crate::models::{Permission, PermissionGrant, ResourceType, Role};

/// A user's resolved permissions at load time.
#[derive(Debug, Clone)]
pub struct EffectiveSet {
    pub role: Role,
    /// Unscoped effective names: role grants plus unscoped user grants,
    /// minus unscoped revocations.
    pub permissions: HashSet<Permission>,
    /// Non-expired user rows kept verbatim for scoped point checks.
    pub grants: Vec<PermissionGrant>,
    /// True when the set came from the offline catalog fallback.
    pub from_fallback: bool,
}

impl EffectiveSet {
    fn fallback(role: Role) -> Self {
        Self {
            role,
            permissions: catalog::fallback_permissions(role).iter().copied().collect(),
            grants: Vec::new(),
            from_fallback: true,
        }
    }

    /// Plain membership. System Admin holds everything.
    pub fn contains(&self, permission: Permission) -> bool {
        self.role == Role::SystemAdmin || self.permissions.contains(&permission)
    }
}

pub struct PermissionResolver {
    backend: Arc<dyn TableBackend>,
    cache: Mutex<HashMap<Uuid, Arc<EffectiveSet>>>,
}

impl PermissionResolver {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve and cache the user's effective set.
    ///
    /// Absence of a matching row means "not granted", never "unknown".
    /// An unreachable backend resolves to the role catalog instead of
    /// failing the caller.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    pub async fn load_permissions(&self, user_id: Uuid, role: Role) -> Result<Arc<EffectiveSet>> {
        if let Some(cached) = self.cache.lock().unwrap().get(&user_id) {
            return Ok(Arc::clone(cached));
        }

        let set = match self.resolve(user_id, role).await {
            Ok(set) => set,
            Err(Error::BackendUnavailable(reason)) => {
                warn!(%reason, "backend unavailable, using role catalog defaults");
                EffectiveSet::fallback(role)
            }
            Err(err) => return Err(err),
        };

        let set = Arc::new(set);
        self.cache
            .lock()
            .unwrap()
            .insert(user_id, Arc::clone(&set));
        Ok(set)
    }

    async fn resolve(&self, user_id: Uuid, role: Role) -> Result<EffectiveSet> {
        let now = Utc::now();

        // Role grants come from the backend when seeded, otherwise from
        // the built-in catalog (the two are kept in step).
        let role_rows = self
            .backend
            .query("role_permissions", &format!(r#"role=="{}""#, role.as_str()))
            .await?;
        let mut permissions: HashSet<Permission> = if role_rows.is_empty() {
            catalog::role_permissions(role).iter().copied().collect()
        } else {
            role_rows
                .iter()
                .filter_map(|row| row.get("permission")?.as_str())
                .filter_map(Permission::from_name)
                .collect()
        };

        let user_rows = self
            .backend
            .query("user_permissions", &format!(r#"user_id=="{user_id}""#))
            .await?;
        let mut grants = Vec::with_capacity(user_rows.len());
        for row in user_rows {
            match serde_json::from_value::<PermissionGrant>(row.clone()) {
                Ok(grant) if grant.is_expired(now) => {}
                Ok(grant) => grants.push(grant),
                Err(err) => warn!(%err, "skipping unreadable permission row"),
            }
        }

        for grant in &grants {
            // Only unscoped rows move the global membership set; scoped
            // rows are consulted by the point check.
            if grant.resource_type.is_none() && grant.resource_id.is_none() {
                if grant.granted {
                    permissions.insert(grant.permission);
                } else {
                    permissions.remove(&grant.permission);
                }
            }
        }

        debug!(count = permissions.len(), "permissions resolved");
        Ok(EffectiveSet {
            role,
            permissions,
            grants,
            from_fallback: false,
        })
    }

    /// Membership check against the cached set. Never errors: resolution
    /// failure degrades to the role catalog.
    pub async fn has_permission(&self, user_id: Uuid, role: Role, permission: Permission) -> bool {
        if role == Role::SystemAdmin {
            return true;
        }
        match self.load_permissions(user_id, role).await {
            Ok(set) => set.contains(permission),
            Err(_) => catalog::fallback_permissions(role).contains(&permission),
        }
    }

    pub async fn has_any_permission(
        &self,
        user_id: Uuid,
        role: Role,
        permissions: &[Permission],
    ) -> bool {
        for &permission in permissions {
            if self.has_permission(user_id, role, permission).await {
                return true;
            }
        }
        false
    }

    pub async fn has_all_permissions(
        &self,
        user_id: Uuid,
        role: Role,
        permissions: &[Permission],
    ) -> bool {
        for &permission in permissions {
            if !self.has_permission(user_id, role, permission).await {
                return false;
            }
        }
        true
    }

    /// Point check against a concrete resource.
    ///
    /// A scoped revocation matching the resource denies outright; a scoped
    /// grant matching it supplies the membership a role may lack. When the
    /// permission is ownership-bound and both a resource and its kind are
    /// named, the hierarchy must also place the resource inside the
    /// user's reach.
    pub async fn has_permission_advanced(
        &self,
        user_id: Uuid,
        role: Role,
        permission: Permission,
        resource_id: Option<Uuid>,
        resource_type: Option<ResourceType>,
        hierarchy: &HierarchyResolver,
    ) -> bool {
        if role == Role::SystemAdmin {
            return true;
        }

        let Ok(set) = self.load_permissions(user_id, role).await else {
            return catalog::fallback_permissions(role).contains(&permission);
        };

        let scoped: Vec<&PermissionGrant> = set
            .grants
            .iter()
            .filter(|g| {
                g.permission == permission
                    && (g.resource_type.is_some() || g.resource_id.is_some())
                    && g.matches_scope(resource_type, resource_id)
            })
            .collect();
        if scoped.iter().any(|g| !g.granted) {
            return false;
        }
        let member = set.contains(permission) || scoped.iter().any(|g| g.granted);
        if !member {
            return false;
        }

        // The hierarchy can only be consulted when the caller says what
        // kind of resource this is; an id alone does not block.
        match (permission.requires_ownership(), resource_id, resource_type) {
            (true, Some(resource), Some(kind)) => {
                hierarchy.has_resource_access(user_id, role, resource, kind).await
            }
            _ => true,
        }
    }

    /// Replace the user's non-expired rows with `grants`.
    ///
    /// Expired rows stay behind as history. Failure anywhere propagates;
    /// the cache is only dropped after the writes succeed so readers
    /// never observe a half-applied update.
    #[instrument(skip(self, grants), fields(user_id = %user_id, count = grants.len()))]
    pub async fn update_user_permissions(
        &self,
        user_id: Uuid,
        grants: Vec<PermissionGrant>,
        granted_by: Uuid,
    ) -> Result<()> {
        let now = Utc::now();
        let existing = self
            .backend
            .query("user_permissions", &format!(r#"user_id=="{user_id}""#))
            .await?;
        for row in existing {
            if row_expired(&row, now) {
                continue;
            }
            self.backend.delete("user_permissions", row).await?;
        }

        for grant in grants {
            let mut row = serde_json::to_value(&grant)?;
            if let Some(fields) = row.as_object_mut() {
                fields.insert("id".into(), json!(Uuid::new_v4()));
                fields.insert("user_id".into(), json!(user_id));
                fields.insert("granted_by".into(), json!(granted_by));
                fields.insert("granted_at".into(), json!(Utc::now()));
            }
            self.backend.insert("user_permissions", row).await?;
        }

        self.invalidate(user_id);
        Ok(())
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.cache.lock().unwrap().remove(&user_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }
}

fn row_expired(row: &Row, now: DateTime<Utc>) -> bool {
    row.get("expires_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .is_some_and(|at| at <= now)
}
