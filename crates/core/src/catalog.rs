//! Role catalogs
//!
//! The one authoritative place for role-derived permission sets and the
//! per-role assignable-roles allow-lists. Both the permission resolver and
//! the user-creation guard consume these tables; nothing else defines them.

use crate::models::{Permission, Role};

/// Full permission set a role carries by itself.
pub fn role_permissions(role: Role) -> &'static [Permission] {
    use Permission::*;
    match role {
        Role::SystemAdmin => &[
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
        ],
        Role::UserManager => &[
            ViewDashboard,
            ManageUsers,
            ViewReports,
            ReceiveAlerts,
            AccessSupport,
        ],
        Role::CompanyManager => &[
            ViewDashboard,
            ManageSites,
            ManageHouses,
            ViewHouses,
            ManageUsers,
            ViewEvents,
            ViewReports,
            ReceiveAlerts,
            AccessSupport,
        ],
        Role::SiteManager => &[
            ViewDashboard,
            ManageHouses,
            ViewHouses,
            ManageSensors,
            ViewSensors,
            ViewEvents,
            ViewReports,
            ReceiveAlerts,
            AccessSupport,
        ],
        Role::HouseManager => &[
            ViewDashboard,
            ViewHouses,
            ManageSensors,
            ViewSensors,
            ViewEvents,
            ViewReports,
            ReceiveAlerts,
            AccessSupport,
        ],
        Role::FamilyManager => &[
            ViewDashboard,
            ViewHouses,
            ViewSensors,
            ViewEvents,
            ReceiveAlerts,
            AccessSupport,
        ],
        Role::Caregiver | Role::FamilyMember => &[ViewDashboard, ReceiveAlerts, AccessSupport],
    }
}

/// Minimal defaults used when the backend cannot be reached.
///
/// Deliberately the same table as [`role_permissions`]: a backend hiccup
/// must never strip System Admin of `manageUsers` or anyone of their
/// role-derived baseline.
pub fn fallback_permissions(role: Role) -> &'static [Permission] {
    role_permissions(role)
}

/// Roles an actor of the given role may assign to new or edited users.
///
/// This allow-list is the source of truth for user-creation validation.
/// It stays consistent with the level ordering by construction; the tests
/// below hold it to that.
pub fn assignable_roles(role: Role) -> &'static [Role] {
    use Role::*;
    match role {
        SystemAdmin => &[
            SystemAdmin,
            UserManager,
            CompanyManager,
            SiteManager,
            HouseManager,
            FamilyManager,
            Caregiver,
            FamilyMember,
        ],
        UserManager => &[
            SiteManager,
            HouseManager,
            FamilyManager,
            Caregiver,
            FamilyMember,
        ],
        CompanyManager => &[SiteManager, HouseManager, FamilyManager, Caregiver, FamilyMember],
        SiteManager => &[HouseManager, FamilyManager, Caregiver, FamilyMember],
        HouseManager | FamilyManager => &[Caregiver, FamilyMember],
        Caregiver | FamilyMember => &[],
    }
}
