//! Permission and grant models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Named capabilities checked by the resolver and route guard.
///
/// Wire names are the camelCase strings stored in the `permissions.name`
/// column and declared on routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    ViewDashboard,
    ManageCompanies,
    ManageSites,
    ManageHouses,
    ViewHouses,
    ManageSensors,
    ViewSensors,
    ManageUsers,
    ViewEvents,
    ViewReports,
    ReceiveAlerts,
    AccessSupport,
    SystemConfig,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewDashboard => "viewDashboard",
            Permission::ManageCompanies => "manageCompanies",
            Permission::ManageSites => "manageSites",
            Permission::ManageHouses => "manageHouses",
            Permission::ViewHouses => "viewHouses",
            Permission::ManageSensors => "manageSensors",
            Permission::ViewSensors => "viewSensors",
            Permission::ManageUsers => "manageUsers",
            Permission::ViewEvents => "viewEvents",
            Permission::ViewReports => "viewReports",
            Permission::ReceiveAlerts => "receiveAlerts",
            Permission::AccessSupport => "accessSupport",
            Permission::SystemConfig => "systemConfig",
        }
    }

    /// Parse a wire name. Unknown names resolve to `None` and are skipped
    /// by row parsing rather than failing a whole load.
    pub fn from_name(name: &str) -> Option<Permission> {
        Permission::all().iter().copied().find(|p| p.as_str() == name)
    }

    /// True when a point check with a concrete resource must go through the
    /// hierarchy resolver instead of the plain membership test.
    pub fn requires_ownership(&self) -> bool {
        matches!(
            self,
            Permission::ManageHouses
                | Permission::ViewHouses
                | Permission::ManageSensors
                | Permission::ViewSensors
                | Permission::ManageSites
        )
    }

    pub fn all() -> &'static [Permission] {
        &[
            Permission::ViewDashboard,
            Permission::ManageCompanies,
            Permission::ManageSites,
            Permission::ManageHouses,
            Permission::ViewHouses,
            Permission::ManageSensors,
            Permission::ViewSensors,
            Permission::ManageUsers,
            Permission::ViewEvents,
            Permission::ViewReports,
            Permission::ReceiveAlerts,
            Permission::AccessSupport,
            Permission::SystemConfig,
        ]
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of resource a grant or mapping is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Company,
    Site,
    House,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Company => "company",
            ResourceType::Site => "site",
            ResourceType::House => "house",
        }
    }
}

/// A user-specific permission row from the `user_permissions` table.
///
/// `granted == false` is an explicit revoke and beats a role-derived grant
/// of the same name and scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub permission: Permission,
    pub granted: bool,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// True when the grant applies to the given resource point check.
    /// An unscoped grant matches everything.
    pub fn matches_scope(&self, resource_type: Option<ResourceType>, resource_id: Option<Uuid>) -> bool {
        let type_ok = match (self.resource_type, resource_type) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine == theirs,
        };
        let id_ok = match (self.resource_id, resource_id) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine == theirs,
        };
        type_ok && id_ok
    }
}
