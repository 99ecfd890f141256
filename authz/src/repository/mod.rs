//! Storage interfaces consumed by the security manager.
//!
//! Lookups return `Ok(None)` for a missing entity; every other failure is a
//! [`PersistenceError`](crate::error::PersistenceError). The SQLite
//! implementation lives in the `database` crate; [`InMemoryStore`] backs
//! tests and embedded use.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Claim, Limit, Principal, Realm, Role};
use crate::types::Effect;

/// Realms are append-only: there is no update or delete.
#[async_trait]
pub trait RealmRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Realm>>;

    async fn find_by_name(&self, realm_name: &str) -> Result<Option<Realm>>;

    /// Inserts a new realm and returns it with its id assigned.
    async fn save(&self, realm: Realm) -> Result<Realm>;

    /// Releases any storage handles.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ClaimRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Claim>>;

    /// Inserts or updates by id. A new claim whose unique key already
    /// exists is a `Duplicate`.
    async fn save(&self, claim: Claim) -> Result<Claim>;

    async fn search(&self, filter: &ClaimFilter) -> Result<Vec<Claim>>;

    async fn remove_by_id(&self, id: &str) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Loads a role with its claims and its parents resolved recursively.
    async fn find_by_id(&self, id: &str) -> Result<Option<Role>>;

    async fn find_by_name(&self, realm: &str, role_name: &str) -> Result<Option<Role>>;

    /// Upserts the role's claims by key, resolves parents by id or name and
    /// rejects a parent graph that leads back to the role.
    async fn save(&self, role: Role) -> Result<Role>;

    async fn search(&self, filter: &RoleFilter) -> Result<Vec<Role>>;

    async fn remove_by_id(&self, id: &str) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Loads a principal with claims, fully resolved roles and limits.
    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>>;

    async fn find_by_name(&self, realm: &str, principal_name: &str) -> Result<Option<Principal>>;

    async fn save(&self, principal: Principal) -> Result<Principal>;

    async fn search(&self, filter: &PrincipalFilter) -> Result<Vec<Principal>>;

    async fn remove_by_id(&self, id: &str) -> Result<()>;

    /// Atomically adds one to the principal's `(limit_type, resource)` limit
    /// and returns it. Fails with `LimitExhausted` when the limit is already
    /// at its maximum and with `NotFound` when there is no such limit.
    async fn increment(&self, principal: &Principal, limit_type: &str, resource: &str)
        -> Result<Limit>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Claim search criteria. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimFilter {
    pub realm: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub effect: Option<Effect>,
}

impl ClaimFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn matches(&self, claim: &Claim) -> bool {
        field_matches(&self.realm, &claim.realm)
            && field_matches(&self.action, &claim.action)
            && field_matches(&self.resource, &claim.resource)
            && self.effect.map_or(true, |e| e == claim.effect)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleFilter {
    pub realm: Option<String>,
    pub role_name: Option<String>,
}

impl RoleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    pub fn matches(&self, role: &Role) -> bool {
        field_matches(&self.realm, &role.realm) && field_matches(&self.role_name, &role.role_name)
    }
}

/// Principal search criteria. `role_name` matches principals that hold the
/// role directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrincipalFilter {
    pub realm: Option<String>,
    pub principal_name: Option<String>,
    pub role_name: Option<String>,
}

impl PrincipalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_principal_name(mut self, principal_name: impl Into<String>) -> Self {
        self.principal_name = Some(principal_name.into());
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    pub fn matches(&self, principal: &Principal) -> bool {
        field_matches(&self.realm, &principal.realm)
            && field_matches(&self.principal_name, &principal.principal_name)
            && self.role_name.as_ref().map_or(true, |name| {
                principal.roles.iter().any(|r| &r.role_name == name)
            })
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |e| e == actual)
}

/// A fresh entity id.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}
