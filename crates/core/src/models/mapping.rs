//! Hierarchy mapping models
//!
//! Rows of the generic `sys_map` table linking users to companies, sites
//! and houses. Containment flows downward: a company-level mapping covers
//! every site and house beneath it, a site-level mapping covers its houses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access tier recorded on a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Admin,
    Manager,
    Viewer,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Admin => "admin",
            AccessLevel::Manager => "manager",
            AccessLevel::Viewer => "viewer",
        }
    }

    pub fn from_name(name: &str) -> Option<AccessLevel> {
        match name {
            "admin" => Some(AccessLevel::Admin),
            "manager" => Some(AccessLevel::Manager),
            "viewer" => Some(AccessLevel::Viewer),
            _ => None,
        }
    }
}

/// An active link between a user and a point in the resource hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub house_id: Option<Uuid>,
    pub access_level: AccessLevel,
    pub permission_scope: Option<String>,
    pub is_active: bool,
}

impl ResourceMapping {
    /// True when this mapping covers the resource given its ancestor chain.
    ///
    /// `site` and `company` are the resource's parents, already resolved by
    /// the caller (None for a company check, site only for a house check).
    pub fn covers(&self, resource_id: Uuid, site: Option<Uuid>, company: Option<Uuid>) -> bool {
        if !self.is_active {
            return false;
        }
        self.house_id == Some(resource_id)
            || self.site_id == Some(resource_id)
            || self.company_id == Some(resource_id)
            || (site.is_some() && self.site_id == site)
            || (company.is_some() && self.company_id == company)
    }
}

/// Company catalog entry annotated with the caller's access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibleCompany {
    pub id: Uuid,
    pub name: String,
    pub access_level: AccessLevel,
    pub permission_scope: Option<String>,
}

/// House catalog entry annotated with the caller's access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibleHouse {
    pub id: Uuid,
    pub number: String,
    pub site_name: Option<String>,
    pub company_name: Option<String>,
    pub access_level: AccessLevel,
    pub permission_scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(company: Option<Uuid>, site: Option<Uuid>, house: Option<Uuid>) -> ResourceMapping {
        ResourceMapping {
            user_id: Uuid::new_v4(),
            company_id: company,
            site_id: site,
            house_id: house,
            access_level: AccessLevel::Manager,
            permission_scope: None,
            is_active: true,
        }
    }

    #[test]
    fn test_direct_cover() {
        let house = Uuid::new_v4();
        let m = mapping(None, None, Some(house));
        assert!(m.covers(house, None, None));
        assert!(!m.covers(Uuid::new_v4(), None, None));
    }

    #[test]
    fn test_ancestor_cover() {
        let company = Uuid::new_v4();
        let site = Uuid::new_v4();
        let house = Uuid::new_v4();

        let company_level = mapping(Some(company), None, None);
        assert!(company_level.covers(site, None, Some(company)));
        assert!(company_level.covers(house, Some(site), Some(company)));

        let site_level = mapping(None, Some(site), None);
        assert!(site_level.covers(house, Some(site), Some(company)));
        assert!(!site_level.covers(house, Some(Uuid::new_v4()), None));
    }

    #[test]
    fn test_inactive_grants_nothing() {
        let house = Uuid::new_v4();
        let mut m = mapping(None, None, Some(house));
        m.is_active = false;
        assert!(!m.covers(house, None, None));
    }
}
