//! Role model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authority tiers of the monitoring product.
///
/// Levels order roles by authority: 0 is the highest and larger numbers are
/// lower. Several roles share a level, so ordering goes through [`Role::level`]
/// rather than enum discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full control over the whole system; self-governing.
    #[serde(rename = "System Admin")]
    SystemAdmin,
    /// Manages user accounts across companies.
    #[serde(rename = "User Manager")]
    UserManager,
    /// Manages a company and everything beneath it.
    #[serde(rename = "Company Manager")]
    CompanyManager,
    /// Manages a site and its houses.
    #[serde(rename = "Site Manager")]
    SiteManager,
    /// Manages a single house and its sensors.
    #[serde(rename = "House Manager")]
    HouseManager,
    /// Manages family members of a house.
    #[serde(rename = "Family Manager")]
    FamilyManager,
    /// Views and receives alerts for assigned houses.
    #[serde(rename = "Caregiver")]
    Caregiver,
    /// Resident-level access.
    #[serde(rename = "Family Member")]
    FamilyMember,
}

impl Role {
    /// Hierarchy level (0 = highest authority).
    pub fn level(&self) -> u8 {
        match self {
            Role::SystemAdmin => 0,
            Role::UserManager | Role::CompanyManager => 1,
            Role::SiteManager => 2,
            Role::HouseManager | Role::FamilyManager => 3,
            Role::Caregiver | Role::FamilyMember => 4,
        }
    }

    /// Name as stored in the `users.role` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SystemAdmin => "System Admin",
            Role::UserManager => "User Manager",
            Role::CompanyManager => "Company Manager",
            Role::SiteManager => "Site Manager",
            Role::HouseManager => "House Manager",
            Role::FamilyManager => "Family Manager",
            Role::Caregiver => "Caregiver",
            Role::FamilyMember => "Family Member",
        }
    }

    /// Parse a stored role name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Role> {
        Role::all().iter().copied().find(|r| r.as_str() == name)
    }

    /// True when the actor may assign or edit a target of this role.
    ///
    /// An actor acts on strictly lower-authority roles only; System Admin is
    /// the exception and may act on itself.
    pub fn outranks(&self, target: Role) -> bool {
        if *self == Role::SystemAdmin {
            return true;
        }
        self.level() < target.level()
    }

    /// All roles, highest authority first.
    pub fn all() -> &'static [Role] {
        &[
            Role::SystemAdmin,
            Role::UserManager,
            Role::CompanyManager,
            Role::SiteManager,
            Role::HouseManager,
            Role::FamilyManager,
            Role::Caregiver,
            Role::FamilyMember,
        ]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
