//! Resource hierarchy access
//!
//! Companies contain sites, sites contain houses. A user's reach is the
//! set of active `sys_map` rows; a mapping at any level covers everything
//! beneath it. Ancestors are resolved explicitly (house -> site ->
//! company) so containment holds regardless of which level a mapping
//! names. Every check denies on internal failure.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::backend::{Row, TableBackend};
use crate::catalog;
use crate::error::{Error, Result};
use crate::models::{
    AccessLevel, AccessibleCompany, AccessibleHouse, ResourceMapping, ResourceType, Role,
};

/// A resource together with its resolved ancestors.
#[derive(Debug, Clone, Copy)]
struct AncestorChain {
    site: Option<Uuid>,
    company: Option<Uuid>,
}

pub struct HierarchyResolver {
    backend: Arc<dyn TableBackend>,
    cache: Mutex<HashMap<Uuid, Arc<Vec<ResourceMapping>>>>,
}

impl HierarchyResolver {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Active mappings for the user, cached until invalidated.
    pub async fn mappings(&self, user_id: Uuid) -> Result<Arc<Vec<ResourceMapping>>> {
        if let Some(cached) = self.cache.lock().unwrap().get(&user_id) {
            return Ok(Arc::clone(cached));
        }

        let rows = self
            .backend
            .query("sys_map", &format!(r#"user_id=="{user_id}" and is_active==true"#))
            .await?;
        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<ResourceMapping>(row) {
                Ok(mapping) => mappings.push(mapping),
                Err(err) => warn!(%err, "skipping unreadable mapping row"),
            }
        }

        let mappings = Arc::new(mappings);
        self.cache
            .lock()
            .unwrap()
            .insert(user_id, Arc::clone(&mappings));
        Ok(mappings)
    }

    /// True iff the user may touch the resource, directly or through an
    /// ancestor mapping. Denies on any internal failure.
    #[instrument(skip(self), fields(user_id = %user_id, resource = %resource_id))]
    pub async fn has_resource_access(
        &self,
        user_id: Uuid,
        role: Role,
        resource_id: Uuid,
        resource_type: ResourceType,
    ) -> bool {
        if role == Role::SystemAdmin {
            return true;
        }

        let chain = match self.ancestors(resource_id, resource_type).await {
            Ok(chain) => chain,
            Err(err) => {
                warn!(%err, "ancestor lookup failed, denying");
                return false;
            }
        };
        match self.mappings(user_id).await {
            Ok(mappings) => mappings
                .iter()
                .any(|m| m.covers(resource_id, chain.site, chain.company)),
            Err(err) => {
                warn!(%err, "mapping lookup failed, denying");
                false
            }
        }
    }

    async fn ancestors(&self, resource_id: Uuid, resource_type: ResourceType) -> Result<AncestorChain> {
        match resource_type {
            ResourceType::Company => Ok(AncestorChain {
                site: None,
                company: None,
            }),
            ResourceType::Site => Ok(AncestorChain {
                site: None,
                company: self.parent(resource_id, "sites", "company_id").await?,
            }),
            ResourceType::House => {
                let site = self.parent(resource_id, "houses", "site_id").await?;
                let company = match site {
                    Some(site) => self.parent(site, "sites", "company_id").await?,
                    None => None,
                };
                Ok(AncestorChain { site, company })
            }
        }
    }

    async fn parent(&self, id: Uuid, table: &str, field: &str) -> Result<Option<Uuid>> {
        let rows = self.backend.query(table, &format!(r#"id=="{id}""#)).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(field))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok()))
    }

    /// Companies the user can see, annotated with the access that gets
    /// them there. System Admin sees the full catalog as admin.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn accessible_companies(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Vec<AccessibleCompany>> {
        let companies = self.backend.query("companies", "deleted_at==null").await?;

        if role == Role::SystemAdmin {
            return Ok(companies
                .iter()
                .filter_map(|row| {
                    Some(AccessibleCompany {
                        id: row_id(row)?,
                        name: row.get("name")?.as_str()?.to_string(),
                        access_level: AccessLevel::Admin,
                        permission_scope: Some("full".into()),
                    })
                })
                .collect());
        }

        let mappings = self.mappings(user_id).await?;
        let sites = self.backend.query("sites", "").await?;
        let houses = self.backend.query("houses", "").await?;
        let site_company = parent_index(&sites, "company_id");
        let house_site = parent_index(&houses, "site_id");

        // Resolve each mapping to the company it ultimately sits under.
        let mut reachable: HashMap<Uuid, &ResourceMapping> = HashMap::new();
        for mapping in mappings.iter() {
            let company = mapping.company_id.or_else(|| {
                mapping
                    .site_id
                    .or_else(|| mapping.house_id.and_then(|h| house_site.get(&h).copied()))
                    .and_then(|site| site_company.get(&site).copied())
            });
            if let Some(company) = company {
                reachable.entry(company).or_insert(mapping);
            }
        }

        Ok(companies
            .iter()
            .filter_map(|row| {
                let id = row_id(row)?;
                let mapping = reachable.get(&id)?;
                Some(AccessibleCompany {
                    id,
                    name: row.get("name")?.as_str()?.to_string(),
                    access_level: mapping.access_level,
                    permission_scope: mapping.permission_scope.clone(),
                })
            })
            .collect())
    }

    /// Houses the user can see, joined with site and company names.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn accessible_houses(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Vec<AccessibleHouse>> {
        let houses = self.backend.query("houses", "deleted_at==null").await?;
        let sites = self.backend.query("sites", "").await?;
        let companies = self.backend.query("companies", "").await?;

        let site_company = parent_index(&sites, "company_id");
        let site_names = name_index(&sites);
        let company_names = name_index(&companies);

        let mappings = if role == Role::SystemAdmin {
            None
        } else {
            Some(self.mappings(user_id).await?)
        };

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for row in &houses {
            let Some(id) = row_id(row) else { continue };
            if !seen.insert(id) {
                continue;
            }
            let site = row
                .get("site_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            let company = site.and_then(|s| site_company.get(&s).copied());

            let (access_level, permission_scope) = match &mappings {
                None => (AccessLevel::Admin, Some("full".to_string())),
                Some(mappings) => {
                    match mappings.iter().find(|m| m.covers(id, site, company)) {
                        Some(m) => (m.access_level, m.permission_scope.clone()),
                        None => continue,
                    }
                }
            };

            out.push(AccessibleHouse {
                id,
                number: row
                    .get("number")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                site_name: site.and_then(|s| site_names.get(&s).cloned()),
                company_name: company.and_then(|c| company_names.get(&c).cloned()),
                access_level,
                permission_scope,
            });
        }
        debug!(count = out.len(), "houses resolved");
        Ok(out)
    }

    /// Gate for creating a user with `target_role` attached to the given
    /// resources.
    ///
    /// The role catalog's allow-list is authoritative; it never permits
    /// assigning upward, so the level ordering needs no separate check.
    /// Every supplied resource must be inside the creator's own reach.
    pub async fn validate_user_creation(
        &self,
        creator_id: Uuid,
        creator_role: Role,
        target_role: Role,
        company_id: Option<Uuid>,
        site_id: Option<Uuid>,
        house_id: Option<Uuid>,
    ) -> Result<()> {
        if !catalog::assignable_roles(creator_role).contains(&target_role) {
            return Err(Error::RoleNotAssignable {
                actor: creator_role.as_str().to_string(),
                target: target_role.as_str().to_string(),
            });
        }

        let checks = [
            (company_id, ResourceType::Company),
            (site_id, ResourceType::Site),
            (house_id, ResourceType::House),
        ];
        for (resource, kind) in checks {
            let Some(resource) = resource else { continue };
            if !self
                .has_resource_access(creator_id, creator_role, resource, kind)
                .await
            {
                return Err(Error::ResourceAccessDenied(format!(
                    "{} {resource} is outside the creator's scope",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Replace the user's house-level mappings.
    ///
    /// Row writes propagate failure; the cache is dropped only after all
    /// writes succeed.
    #[instrument(skip(self, house_ids), fields(user_id = %user_id, count = house_ids.len()))]
    pub async fn assign_houses(&self, user_id: Uuid, house_ids: &[Uuid]) -> Result<()> {
        let existing = self
            .backend
            .query("sys_map", &format!(r#"user_id=="{user_id}" and house_id!=null"#))
            .await?;
        for row in existing {
            self.backend.delete("sys_map", row).await?;
        }

        for house_id in house_ids {
            self.backend
                .insert(
                    "sys_map",
                    json!({
                        "id": Uuid::new_v4(),
                        "user_id": user_id,
                        "house_id": house_id,
                        "access_level": "manager",
                        "is_active": true,
                    }),
                )
                .await?;
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

fn row_id(row: &Row) -> Option<Uuid> {
    row.get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn parent_index(rows: &[Row], field: &str) -> HashMap<Uuid, Uuid> {
    rows.iter()
        .filter_map(|row| {
            let id = row_id(row)?;
            let parent = row
                .get(field)
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())?;
            Some((id, parent))
        })
        .collect()
}

fn name_index(rows: &[Row]) -> HashMap<Uuid, String> {
    rows.iter()
        .filter_map(|row| Some((row_id(row)?, row.get("name")?.as_str()?.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    struct World {
        backend: Arc<MemoryBackend>,
        resolver: HierarchyResolver,
        company: Uuid,
        site: Uuid,
        house: Uuid,
    }

    fn world() -> World {
        let backend = Arc::new(MemoryBackend::new());
        let company = Uuid::new_v4();
        let site = Uuid::new_v4();
        let house = Uuid::new_v4();
        backend.push("companies", json!({"id": company, "name": "TopSense"}));
        backend.push("sites", json!({"id": site, "name": "North", "company_id": company}));
        backend.push("houses", json!({"id": house, "number": "12", "site_id": site}));
        let resolver = HierarchyResolver::new(Arc::clone(&backend) as Arc<dyn TableBackend>);
        World {
            backend,
            resolver,
            company,
            site,
            house,
        }
    }

    fn map_row(user: Uuid, company: Option<Uuid>, site: Option<Uuid>, house: Option<Uuid>) -> Row {
        json!({
            "id": Uuid::new_v4(),
            "user_id": user,
            "company_id": company,
            "site_id": site,
            "house_id": house,
            "access_level": "manager",
            "permission_scope": "houses",
            "is_active": true,
        })
    }

    #[tokio::test]
    async fn test_site_mapping_covers_contained_house() {
        let w = world();
        let user = Uuid::new_v4();
        w.backend.push("sys_map", map_row(user, None, Some(w.site), None));

        assert!(
            w.resolver
                .has_resource_access(user, Role::SiteManager, w.house, ResourceType::House)
                .await
        );
        assert!(
            w.resolver
                .has_resource_access(user, Role::SiteManager, w.site, ResourceType::Site)
                .await
        );
        // the parent company is not covered by a site mapping
        assert!(
            !w.resolver
                .has_resource_access(user, Role::SiteManager, w.company, ResourceType::Company)
                .await
        );
    }

    #[tokio::test]
    async fn test_company_mapping_covers_whole_subtree() {
        let w = world();
        let user = Uuid::new_v4();
        w.backend
            .push("sys_map", map_row(user, Some(w.company), None, None));

        for (id, kind) in [
            (w.company, ResourceType::Company),
            (w.site, ResourceType::Site),
            (w.house, ResourceType::House),
        ] {
            assert!(w.resolver.has_resource_access(user, Role::CompanyManager, id, kind).await);
        }
    }

    #[tokio::test]
    async fn test_no_mapping_denies() {
        let w = world();
        let user = Uuid::new_v4();
        assert!(
            !w.resolver
                .has_resource_access(user, Role::HouseManager, w.house, ResourceType::House)
                .await
        );
    }

    #[tokio::test]
    async fn test_backend_failure_denies() {
        let w = world();
        let user = Uuid::new_v4();
        w.backend.set_offline(true);
        assert!(
            !w.resolver
                .has_resource_access(user, Role::HouseManager, w.house, ResourceType::House)
                .await
        );
    }

    #[tokio::test]
    async fn test_admin_sees_full_catalog() {
        let w = world();
        let admin = Uuid::new_v4();

        let companies = w.resolver.accessible_companies(admin, Role::SystemAdmin).await.unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].access_level, AccessLevel::Admin);

        let houses = w.resolver.accessible_houses(admin, Role::SystemAdmin).await.unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].site_name.as_deref(), Some("North"));
        assert_eq!(houses[0].company_name.as_deref(), Some("TopSense"));
    }

    #[tokio::test]
    async fn test_mapped_user_sees_annotated_rows() {
        let w = world();
        let user = Uuid::new_v4();
        let other_house = Uuid::new_v4();
        w.backend
            .push("houses", json!({"id": other_house, "number": "99", "site_id": Uuid::new_v4()}));
        w.backend.push("sys_map", map_row(user, None, Some(w.site), None));

        let houses = w.resolver.accessible_houses(user, Role::SiteManager).await.unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].id, w.house);
        assert_eq!(houses[0].access_level, AccessLevel::Manager);
        assert_eq!(houses[0].permission_scope.as_deref(), Some("houses"));

        let companies = w.resolver.accessible_companies(user, Role::SiteManager).await.unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].id, w.company);
    }

    #[tokio::test]
    async fn test_validate_user_creation_allow_list_first() {
        let w = world();
        let creator = Uuid::new_v4();
        w.backend.push("sys_map", map_row(creator, None, Some(w.site), None));

        // Caregiver may not create anyone, even inside their own scope
        let err = w
            .resolver
            .validate_user_creation(creator, Role::Caregiver, Role::FamilyMember, None, None, Some(w.house))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleNotAssignable { .. }));

        // Site manager may create a house manager for a house they reach
        w.resolver
            .validate_user_creation(creator, Role::SiteManager, Role::HouseManager, None, None, Some(w.house))
            .await
            .unwrap();

        // but not for a house outside their site
        let stray = Uuid::new_v4();
        let err = w
            .resolver
            .validate_user_creation(creator, Role::SiteManager, Role::HouseManager, None, None, Some(stray))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceAccessDenied(_)));
    }

    #[tokio::test]
    async fn test_assign_houses_replaces_mappings() {
        let w = world();
        let user = Uuid::new_v4();
        w.backend.push("sys_map", map_row(user, None, None, Some(Uuid::new_v4())));

        let next = Uuid::new_v4();
        w.resolver.assign_houses(user, &[w.house, next]).await.unwrap();

        let rows = w.backend.rows("sys_map");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["user_id"] == json!(user)));

        // cache was invalidated, fresh mappings are visible
        assert!(
            w.resolver
                .has_resource_access(user, Role::HouseManager, w.house, ResourceType::House)
                .await
        );
    }
}
