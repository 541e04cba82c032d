//! End-to-end flows through a fully wired engine.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Engine;
use crate::backend::{MemoryBackend, TableBackend};
use crate::config::{SessionConfig, DEFAULT_STORAGE_KEY};
use crate::guard::{GuardDecision, RouteMeta};
use crate::models::{Permission, ResourceType, Role, Session};
use crate::notify::testing::RecordingNotifier;
use crate::session::{MemorySessionStorage, SessionEvent, SessionStorage};

struct Harness {
    backend: Arc<MemoryBackend>,
    storage: MemorySessionStorage,
    engine: Engine,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let storage = MemorySessionStorage::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Engine::new(
        Arc::clone(&backend) as Arc<dyn TableBackend>,
        SessionConfig::lightweight(),
        Arc::new(storage.clone()),
        Arc::clone(&notifier) as _,
    );
    Harness {
        backend,
        storage,
        engine,
        notifier,
    }
}

impl Harness {
    fn seed_user(&self, email: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.backend.push(
            "users",
            json!({"id": id, "email": email, "password": "secret", "role": role}),
        );
        id
    }

    /// Rewrite the persisted record with an already-passed deadline, the
    /// way a long-idle tab would find it.
    fn age_session(&self) {
        let blob = self.storage.load(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        let mut session: Session = serde_json::from_str(&blob).unwrap();
        session.expires_at = Utc::now() - Duration::seconds(1);
        self.storage
            .save(DEFAULT_STORAGE_KEY, &serde_json::to_string(&session).unwrap())
            .unwrap();
    }
}

#[tokio::test]
async fn test_admin_login_opens_thirty_minute_session_with_full_access() {
    let h = harness();
    let id = h.seed_user("admin@topsense.io", "System Admin");

    let session = h.engine.login("admin@topsense.io", "secret").await.unwrap();
    assert_eq!(session.user.id, id);
    assert_eq!(session.expires_at - session.created_at, Duration::minutes(30));

    assert!(
        h.engine
            .permissions()
            .has_permission(id, Role::SystemAdmin, Permission::ManageUsers)
            .await
    );
    let route = RouteMeta::authenticated("/users").with_permission(Permission::ManageUsers);
    assert_eq!(h.engine.guard().decide(&route).await, GuardDecision::Allow);
}

#[tokio::test]
async fn test_expired_session_redirects_to_login_with_origin() {
    let h = harness();
    h.seed_user("user@topsense.io", "Caregiver");
    h.engine.login("user@topsense.io", "secret").await.unwrap();
    h.age_session();

    let mut events = h.engine.session().subscribe();
    let decision = h.engine.guard().decide(&RouteMeta::authenticated("/houses")).await;
    assert_eq!(
        decision,
        GuardDecision::RedirectToLogin {
            redirect: "/houses".into()
        }
    );
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    assert!(!h.engine.is_authenticated());
}

#[tokio::test]
async fn test_caregiver_gets_exactly_the_role_derived_set() {
    let h = harness();
    let id = h.seed_user("care@topsense.io", "Caregiver");
    h.engine.login("care@topsense.io", "secret").await.unwrap();

    let set = h
        .engine
        .permissions()
        .load_permissions(id, Role::Caregiver)
        .await
        .unwrap();
    let expected = [
        Permission::ViewDashboard,
        Permission::ReceiveAlerts,
        Permission::AccessSupport,
    ];
    assert_eq!(set.permissions.len(), expected.len());
    for permission in expected {
        assert!(set.contains(permission));
    }
    assert!(!set.contains(Permission::ManageUsers));
}

#[tokio::test]
async fn test_site_mapping_bounds_house_level_checks() {
    let h = harness();
    let id = h.seed_user("sm@topsense.io", "Site Manager");

    let company = Uuid::new_v4();
    let site = Uuid::new_v4();
    let inside = Uuid::new_v4();
    let outside = Uuid::new_v4();
    h.backend.push("companies", json!({"id": company, "name": "TopSense"}));
    h.backend.push("sites", json!({"id": site, "name": "North", "company_id": company}));
    h.backend.push("houses", json!({"id": inside, "number": "1", "site_id": site}));
    h.backend.push("houses", json!({"id": outside, "number": "2", "site_id": Uuid::new_v4()}));
    h.backend.push(
        "sys_map",
        json!({
            "id": Uuid::new_v4(),
            "user_id": id,
            "site_id": site,
            "access_level": "manager",
            "is_active": true,
        }),
    );

    h.engine.login("sm@topsense.io", "secret").await.unwrap();

    let permissions = h.engine.permissions();
    let hierarchy = h.engine.hierarchy();
    assert!(
        permissions
            .has_permission_advanced(
                id,
                Role::SiteManager,
                Permission::ManageHouses,
                Some(inside),
                Some(ResourceType::House),
                hierarchy.as_ref(),
            )
            .await
    );
    assert!(
        !permissions
            .has_permission_advanced(
                id,
                Role::SiteManager,
                Permission::ManageHouses,
                Some(outside),
                Some(ResourceType::House),
                hierarchy.as_ref(),
            )
            .await
    );

    let houses = hierarchy.accessible_houses(id, Role::SiteManager).await.unwrap();
    assert_eq!(houses.len(), 1);
    assert_eq!(houses[0].id, inside);
}

#[tokio::test]
async fn test_backend_outage_degrades_to_role_catalog() {
    let h = harness();
    let id = h.seed_user("admin@topsense.io", "System Admin");
    h.engine.login("admin@topsense.io", "secret").await.unwrap();

    h.engine.permissions().invalidate(id);
    h.backend.set_offline(true);

    let set = h
        .engine
        .permissions()
        .load_permissions(id, Role::SystemAdmin)
        .await
        .unwrap();
    assert!(set.from_fallback);
    assert!(set.contains(Permission::ManageUsers));

    // the guard still lets the admin through on the degraded set
    let route = RouteMeta::authenticated("/users").with_permission(Permission::ManageUsers);
    assert_eq!(h.engine.guard().decide(&route).await, GuardDecision::Allow);
    assert!(h.notifier.sent().is_empty());
}
