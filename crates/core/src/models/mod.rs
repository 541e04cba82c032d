//! Data models for HomeSense Core

mod mapping;
mod permission;
mod role;
mod session;

pub use mapping::{AccessLevel, AccessibleCompany, AccessibleHouse, ResourceMapping};
pub use permission::{Permission, PermissionGrant, ResourceType};
pub use role::Role;
pub use session::{generate_token, Session, SessionUser, TokenClaims};
