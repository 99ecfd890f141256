//! In-process implementation of every repository trait.
//!
//! Entities are kept normalized the same way the SQL schema stores them:
//! roles and principals reference claims, parents and roles by id, and are
//! reassembled on every load. All mutation happens under one write lock,
//! which is what makes `increment` atomic here.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    new_id, ClaimFilter, ClaimRepository, PrincipalFilter, PrincipalRepository, RealmRepository,
    RoleFilter, RoleRepository,
};
use crate::error::{PersistenceError, Result};
use crate::model::{Claim, Keyed, Limit, Principal, Realm, Role, UniqueSet};

#[derive(Debug, Clone)]
struct StoredRole {
    role: Role,
    claim_ids: Vec<String>,
    parent_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredPrincipal {
    principal: Principal,
    claim_ids: Vec<String>,
    role_ids: Vec<String>,
    limits: Vec<Limit>,
}

#[derive(Debug, Default)]
struct Tables {
    realms: Vec<Realm>,
    claims: Vec<Claim>,
    roles: Vec<StoredRole>,
    principals: Vec<StoredPrincipal>,
}

/// A cloneable handle to a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn id_of(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or_default()
}

impl Tables {
    fn require_realm(&self, realm_name: &str) -> Result<()> {
        if self.realms.iter().any(|r| r.realm_name == realm_name) {
            Ok(())
        } else {
            Err(PersistenceError::not_found("Realm", realm_name))
        }
    }

    fn claim(&self, id: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| id_of(&c.id) == id)
    }

    fn role(&self, id: &str) -> Option<&StoredRole> {
        self.roles.iter().find(|r| id_of(&r.role.id) == id)
    }

    fn principal(&self, id: &str) -> Option<&StoredPrincipal> {
        self.principals.iter().find(|p| id_of(&p.principal.id) == id)
    }

    /// Finds where `claim` would be written: the index of the row it
    /// replaces, or `None` for a new row. Nothing is modified. When `upsert`
    /// is set, a new claim whose key already exists takes over that row
    /// instead of failing.
    fn claim_slot(&self, claim: &Claim, upsert: bool) -> Result<Option<usize>> {
        claim.validate().map_err(PersistenceError::Validation)?;
        self.require_realm(&claim.realm)?;

        let key = claim.unique_key();
        let by_key = self.claims.iter().position(|c| c.unique_key() == key);
        let by_id = claim
            .id
            .as_deref()
            .and_then(|id| self.claims.iter().position(|c| id_of(&c.id) == id));

        match (by_id, by_key) {
            (Some(i), Some(j)) if i != j => Err(PersistenceError::duplicate("Claim", key)),
            (Some(i), _) => Ok(Some(i)),
            (None, Some(j)) if upsert => Ok(Some(j)),
            (None, Some(_)) => Err(PersistenceError::duplicate("Claim", key)),
            (None, None) => Ok(None),
        }
    }

    fn store_claim(&mut self, mut claim: Claim, upsert: bool) -> Result<Claim> {
        match self.claim_slot(&claim, upsert)? {
            Some(i) => {
                if claim.id.is_none() {
                    claim.id = self.claims[i].id.clone();
                }
                self.claims[i] = claim.clone();
            }
            None => {
                claim.id.get_or_insert_with(new_id);
                self.claims.push(claim.clone());
            }
        }
        Ok(claim)
    }

    /// Embedded claims are all checked before the first one is written, so a
    /// rejected role or principal leaves the claim table untouched.
    fn store_claims(&mut self, claims: &UniqueSet<Claim>) -> Result<Vec<String>> {
        for claim in claims.iter() {
            self.claim_slot(claim, true)?;
        }
        let mut ids = Vec::with_capacity(claims.len());
        for claim in claims.iter() {
            let saved = self.store_claim(claim.clone(), true)?;
            ids.push(saved.id.unwrap_or_default());
        }
        Ok(ids)
    }

    fn resolve_role_id(&self, role: &Role) -> Result<String> {
        let found = match role.id.as_deref() {
            Some(id) => self.role(id),
            None => None,
        }
        .or_else(|| {
            self.roles.iter().find(|r| {
                r.role.realm == role.realm && r.role.role_name == role.role_name
            })
        });

        found
            .and_then(|r| r.role.id.clone())
            .ok_or_else(|| PersistenceError::not_found("Role", role.role_name.clone()))
    }

    /// Is `target` reachable from `from` through stored parent links?
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(stored) = self.role(&current) {
                stack.extend(stored.parent_ids.iter().cloned());
            }
        }
        false
    }

    fn assemble_role(&self, id: &str, path: &mut Vec<String>) -> Option<Role> {
        let stored = self.role(id)?;
        let mut role = stored.role.clone();
        role.claims = stored
            .claim_ids
            .iter()
            .filter_map(|cid| self.claim(cid).cloned())
            .collect();

        path.push(id.to_string());
        for parent_id in &stored.parent_ids {
            if path.contains(parent_id) {
                warn!(
                    "Stored role graph is cyclic at '{}', parent link ignored",
                    role.role_name
                );
                continue;
            }
            if let Some(parent) = self.assemble_role(parent_id, path) {
                role.parents.insert(parent);
            }
        }
        path.pop();

        Some(role)
    }

    fn assemble_principal(&self, stored: &StoredPrincipal) -> Principal {
        let mut principal = stored.principal.clone();
        principal.claims = stored
            .claim_ids
            .iter()
            .filter_map(|cid| self.claim(cid).cloned())
            .collect();
        principal.roles = stored
            .role_ids
            .iter()
            .filter_map(|rid| self.assemble_role(rid, &mut Vec::new()))
            .collect();
        principal.limits = stored.limits.iter().cloned().collect();
        principal
    }
}

#[async_trait]
impl RealmRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Realm>> {
        let tables = self.tables.read().await;
        Ok(tables.realms.iter().find(|r| id_of(&r.id) == id).cloned())
    }

    async fn find_by_name(&self, realm_name: &str) -> Result<Option<Realm>> {
        let tables = self.tables.read().await;
        Ok(tables
            .realms
            .iter()
            .find(|r| r.realm_name == realm_name)
            .cloned())
    }

    async fn save(&self, mut realm: Realm) -> Result<Realm> {
        realm.validate().map_err(PersistenceError::Validation)?;
        let mut tables = self.tables.write().await;

        let exists = tables.realms.iter().any(|r| {
            r.realm_name == realm.realm_name || (realm.id.is_some() && r.id == realm.id)
        });
        if exists {
            return Err(PersistenceError::duplicate("Realm", realm.realm_name));
        }

        realm.id.get_or_insert_with(new_id);
        tables.realms.push(realm.clone());
        debug!("Created realm {}", realm.realm_name);
        Ok(realm)
    }
}

#[async_trait]
impl ClaimRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Claim>> {
        Ok(self.tables.read().await.claim(id).cloned())
    }

    async fn save(&self, claim: Claim) -> Result<Claim> {
        self.tables.write().await.store_claim(claim, false)
    }

    async fn search(&self, filter: &ClaimFilter) -> Result<Vec<Claim>> {
        let tables = self.tables.read().await;
        Ok(tables
            .claims
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn remove_by_id(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.claims.len();
        tables.claims.retain(|c| id_of(&c.id) != id);
        if tables.claims.len() == before {
            return Err(PersistenceError::not_found("Claim", id));
        }

        for stored in tables.roles.iter_mut() {
            stored.claim_ids.retain(|cid| cid != id);
        }
        for stored in tables.principals.iter_mut() {
            stored.claim_ids.retain(|cid| cid != id);
        }
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Role>> {
        Ok(self.tables.read().await.assemble_role(id, &mut Vec::new()))
    }

    async fn find_by_name(&self, realm: &str, role_name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        let id = tables
            .roles
            .iter()
            .find(|r| r.role.realm == realm && r.role.role_name == role_name)
            .and_then(|r| r.role.id.clone());
        Ok(id.and_then(|id| tables.assemble_role(&id, &mut Vec::new())))
    }

    async fn save(&self, mut role: Role) -> Result<Role> {
        role.validate().map_err(PersistenceError::Validation)?;
        let mut tables = self.tables.write().await;
        tables.require_realm(&role.realm)?;

        let key = role.unique_key();
        if let Some(existing) = tables.roles.iter().find(|r| r.role.unique_key() == key) {
            if role.id.is_none() || existing.role.id != role.id {
                return Err(PersistenceError::duplicate("Role", role.role_name));
            }
        }
        if role.parents.contains_key(&key) {
            return Err(PersistenceError::CyclicRole(role.role_name));
        }

        let mut parent_ids = Vec::with_capacity(role.parents.len());
        for parent in role.parents.iter() {
            parent_ids.push(tables.resolve_role_id(parent)?);
        }

        let id = role.id.get_or_insert_with(new_id).clone();
        if parent_ids.iter().any(|pid| tables.reaches(pid, &id)) {
            return Err(PersistenceError::CyclicRole(role.role_name));
        }

        let claim_ids = tables.store_claims(&role.claims)?;

        let mut bare = role.clone();
        bare.claims = UniqueSet::new();
        bare.parents = UniqueSet::new();
        let stored = StoredRole {
            role: bare,
            claim_ids,
            parent_ids,
        };

        match tables.roles.iter().position(|r| r.role.id == role.id) {
            Some(i) => tables.roles[i] = stored,
            None => tables.roles.push(stored),
        }

        debug!("Saved role {}/{}", role.realm, role.role_name);
        tables
            .assemble_role(&id, &mut Vec::new())
            .ok_or_else(|| PersistenceError::not_found("Role", id))
    }

    async fn search(&self, filter: &RoleFilter) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .iter()
            .filter(|r| filter.matches(&r.role))
            .filter_map(|r| tables.assemble_role(id_of(&r.role.id), &mut Vec::new()))
            .collect())
    }

    async fn remove_by_id(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.roles.len();
        tables.roles.retain(|r| id_of(&r.role.id) != id);
        if tables.roles.len() == before {
            return Err(PersistenceError::not_found("Role", id));
        }

        for stored in tables.roles.iter_mut() {
            stored.parent_ids.retain(|pid| pid != id);
        }
        for stored in tables.principals.iter_mut() {
            stored.role_ids.retain(|rid| rid != id);
        }
        Ok(())
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>> {
        let tables = self.tables.read().await;
        Ok(tables.principal(id).map(|p| tables.assemble_principal(p)))
    }

    async fn find_by_name(&self, realm: &str, principal_name: &str) -> Result<Option<Principal>> {
        let tables = self.tables.read().await;
        Ok(tables
            .principals
            .iter()
            .find(|p| p.principal.realm == realm && p.principal.principal_name == principal_name)
            .map(|p| tables.assemble_principal(p)))
    }

    async fn save(&self, mut principal: Principal) -> Result<Principal> {
        principal
            .validate()
            .map_err(PersistenceError::Validation)?;
        let mut tables = self.tables.write().await;
        tables.require_realm(&principal.realm)?;

        let key = principal.unique_key();
        if let Some(existing) = tables
            .principals
            .iter()
            .find(|p| p.principal.unique_key() == key)
        {
            if principal.id.is_none() || existing.principal.id != principal.id {
                return Err(PersistenceError::duplicate(
                    "Principal",
                    principal.principal_name,
                ));
            }
        }

        let mut role_ids = Vec::with_capacity(principal.roles.len());
        for role in principal.roles.iter() {
            role_ids.push(tables.resolve_role_id(role)?);
        }

        let id = principal.id.get_or_insert_with(new_id).clone();

        // Usage counters only move through `increment`; a save keeps the
        // stored value of every limit it already knows.
        let previous = tables
            .principal(&id)
            .map(|p| p.limits.clone())
            .unwrap_or_default();
        let mut limits = Vec::with_capacity(principal.limits.len());
        for limit in principal.limits.iter() {
            limit.validate().map_err(PersistenceError::Validation)?;
            let mut limit = limit.clone();
            let stored = previous
                .iter()
                .find(|p| limit.id.is_some() && p.id == limit.id)
                .or_else(|| {
                    previous
                        .iter()
                        .find(|p| p.limit_type == limit.limit_type && p.resource == limit.resource)
                });
            match stored {
                Some(stored) => {
                    limit.id = stored.id.clone();
                    limit.value = stored.value;
                }
                None => {
                    limit.id.get_or_insert_with(new_id);
                }
            }
            limit.principal_id = Some(id.clone());
            limits.push(limit);
        }

        let claim_ids = tables.store_claims(&principal.claims)?;

        let mut bare = principal.clone();
        bare.claims = UniqueSet::new();
        bare.roles = UniqueSet::new();
        bare.limits = UniqueSet::new();
        let stored = StoredPrincipal {
            principal: bare,
            claim_ids,
            role_ids,
            limits,
        };

        let saved = tables.assemble_principal(&stored);
        match tables
            .principals
            .iter()
            .position(|p| p.principal.id == principal.id)
        {
            Some(i) => tables.principals[i] = stored,
            None => tables.principals.push(stored),
        }

        debug!(
            "Saved principal {}/{}",
            principal.realm, principal.principal_name
        );
        Ok(saved)
    }

    async fn search(&self, filter: &PrincipalFilter) -> Result<Vec<Principal>> {
        let tables = self.tables.read().await;
        Ok(tables
            .principals
            .iter()
            .map(|p| tables.assemble_principal(p))
            .filter(|p| filter.matches(p))
            .collect())
    }

    async fn remove_by_id(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.principals.len();
        tables.principals.retain(|p| id_of(&p.principal.id) != id);
        if tables.principals.len() == before {
            return Err(PersistenceError::not_found("Principal", id));
        }
        Ok(())
    }

    async fn increment(
        &self,
        principal: &Principal,
        limit_type: &str,
        resource: &str,
    ) -> Result<Limit> {
        let mut tables = self.tables.write().await;

        let stored = tables
            .principals
            .iter_mut()
            .find(|p| match principal.id.as_deref() {
                Some(id) => id_of(&p.principal.id) == id,
                None => {
                    p.principal.realm == principal.realm
                        && p.principal.principal_name == principal.principal_name
                }
            })
            .ok_or_else(|| {
                PersistenceError::not_found("Principal", principal.principal_name.clone())
            })?;

        let limit = stored
            .limits
            .iter_mut()
            .find(|l| l.limit_type == limit_type && l.resource == resource)
            .ok_or_else(|| {
                PersistenceError::not_found("Limit", format!("{}/{}", limit_type, resource))
            })?;

        limit.increment()?;
        debug!(
            "Incremented {} limit on {} for {} to {}/{}",
            limit_type, resource, principal.principal_name, limit.value, limit.max_allowed
        );
        Ok(limit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn store_with_realm() -> InMemoryStore {
        let store = InMemoryStore::new();
        RealmRepository::save(&store, Realm::new("banking"))
            .await
            .unwrap();
        store
    }

    fn future_date() -> chrono::NaiveDate {
        (Utc::now() + Duration::days(30)).date_naive()
    }

    #[tokio::test]
    async fn test_realm_is_immutable() {
        let store = store_with_realm().await;
        let realm = RealmRepository::find_by_name(&store, "banking")
            .await
            .unwrap()
            .unwrap();
        assert!(realm.id.is_some());

        let err = RealmRepository::save(&store, realm).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate { entity: "Realm", .. }));
    }

    #[tokio::test]
    async fn test_claim_requires_realm() {
        let store = InMemoryStore::new();
        let err = ClaimRepository::save(&store, Claim::new("nowhere", "read", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { entity: "Realm", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_claim_key() {
        let store = store_with_realm().await;
        ClaimRepository::save(&store, Claim::new("banking", "read", "X"))
            .await
            .unwrap();
        let err = ClaimRepository::save(&store, Claim::new("banking", "read", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate { entity: "Claim", .. }));
    }

    #[tokio::test]
    async fn test_role_save_reuses_existing_claim() {
        let store = store_with_realm().await;
        let claim = ClaimRepository::save(&store, Claim::new("banking", "read", "X"))
            .await
            .unwrap();

        let role = RoleRepository::save(
            &store,
            Role::new("banking", "Reader").with_claim(Claim::new("banking", "read", "X")),
        )
        .await
        .unwrap();

        assert_eq!(role.claims.iter().next().unwrap().id, claim.id);
        let all = ClaimRepository::search(&store, &ClaimFilter::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_parents_resolved_by_name_on_load() {
        let store = store_with_realm().await;
        RoleRepository::save(
            &store,
            Role::new("banking", "Employee").with_claim(Claim::new("banking", "read", "Directory")),
        )
        .await
        .unwrap();
        RoleRepository::save(
            &store,
            Role::new("banking", "Teller").with_parent(Role::new("banking", "Employee")),
        )
        .await
        .unwrap();

        let teller = RoleRepository::find_by_name(&store, "banking", "Teller")
            .await
            .unwrap()
            .unwrap();
        let parent = teller.parents.iter().next().unwrap();
        assert_eq!(parent.role_name, "Employee");
        assert_eq!(parent.claims.len(), 1);
        assert_eq!(teller.all_claims().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_parent_is_not_found() {
        let store = store_with_realm().await;
        let err = RoleRepository::save(
            &store,
            Role::new("banking", "Teller").with_parent(Role::new("banking", "Ghost")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { entity: "Role", .. }));
    }

    #[tokio::test]
    async fn test_cycle_rejected_on_save() {
        let store = store_with_realm().await;
        let a = RoleRepository::save(&store, Role::new("banking", "A"))
            .await
            .unwrap();
        RoleRepository::save(
            &store,
            Role::new("banking", "B").with_parent(Role::new("banking", "A")),
        )
        .await
        .unwrap();

        let mut a = a;
        a.add_parent(Role::new("banking", "B"));
        let err = RoleRepository::save(&store, a).await.unwrap_err();
        assert!(matches!(err, PersistenceError::CyclicRole(name) if name == "A"));

        let err = RoleRepository::save(
            &store,
            Role::new("banking", "C").with_parent(Role::new("banking", "C")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::CyclicRole(_)));
    }

    #[tokio::test]
    async fn test_principal_round_trip_and_search() {
        let store = store_with_realm().await;
        RoleRepository::save(&store, Role::new("banking", "Teller"))
            .await
            .unwrap();

        let saved = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom")
                .with_role(Role::new("banking", "Teller"))
                .with_claim(Claim::new("banking", "read", "Directory"))
                .with_limit(Limit::new("quota", "Report", 2, future_date()))
                .with_property("employeeRegion", "MIDWEST"),
        )
        .await
        .unwrap();

        let id = saved.id.clone().unwrap();
        let loaded = PrincipalRepository::find_by_id(&store, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.roles.len(), 1);
        assert_eq!(loaded.claims.len(), 1);
        assert_eq!(loaded.properties["employeeRegion"], "MIDWEST");
        let limit = loaded.limits.iter().next().unwrap();
        assert_eq!(limit.principal_id.as_deref(), Some(id.as_str()));

        let found = PrincipalRepository::search(
            &store,
            &PrincipalFilter::new().with_role_name("Teller"),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_increment_until_exhausted() {
        let store = store_with_realm().await;
        let tom = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom")
                .with_limit(Limit::new("quota", "Report", 2, future_date())),
        )
        .await
        .unwrap();

        assert_eq!(store.increment(&tom, "quota", "Report").await.unwrap().value, 1);
        assert_eq!(store.increment(&tom, "quota", "Report").await.unwrap().value, 2);
        let err = store.increment(&tom, "quota", "Report").await.unwrap_err();
        assert!(matches!(err, PersistenceError::LimitExhausted { value: 2, .. }));

        let err = store.increment(&tom, "quota", "Export").await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { entity: "Limit", .. }));
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_overrun() {
        let store = store_with_realm().await;
        let tom = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom").with_limit(Limit::new("quota", "Report", 5, future_date())),
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let tom = tom.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&tom, "quota", "Report").await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 5);
    }

    #[tokio::test]
    async fn test_remove_claim_detaches_references() {
        let store = store_with_realm().await;
        let role = RoleRepository::save(
            &store,
            Role::new("banking", "Reader").with_claim(Claim::new("banking", "read", "X")),
        )
        .await
        .unwrap();
        let claim_id = role.claims.iter().next().unwrap().id.clone().unwrap();

        ClaimRepository::remove_by_id(&store, &claim_id).await.unwrap();
        let role = RoleRepository::find_by_id(&store, role.id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(role.claims.is_empty());

        let err = ClaimRepository::remove_by_id(&store, &claim_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_save_keeps_consumed_limit_value() {
        let store = store_with_realm().await;
        let tom = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom")
                .with_limit(Limit::new("quota", "Report", 2, future_date())),
        )
        .await
        .unwrap();

        let stale = PrincipalRepository::find_by_name(&store, "banking", "tom")
            .await
            .unwrap()
            .unwrap();
        store.increment(&tom, "quota", "Report").await.unwrap();
        store.increment(&tom, "quota", "Report").await.unwrap();

        let saved = PrincipalRepository::save(&store, stale.with_property("vip", true))
            .await
            .unwrap();
        assert_eq!(saved.find_limit(Some("quota"), "Report").unwrap().value, 2);
        assert!(matches!(
            store.increment(&tom, "quota", "Report").await.unwrap_err(),
            PersistenceError::LimitExhausted { value: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_save_updates_limit_bounds_but_not_value() {
        let store = store_with_realm().await;
        let tom = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom")
                .with_limit(Limit::new("quota", "Report", 1, future_date())),
        )
        .await
        .unwrap();
        store.increment(&tom, "quota", "Report").await.unwrap();

        // Limits without ids still match the stored ones by type and resource.
        let mut widened = tom.clone();
        widened.limits = UniqueSet::new();
        widened.add_limit(Limit::new("quota", "Report", 3, future_date()));
        widened.add_limit(Limit::new("quota", "Audit", 1, future_date()).with_value(1));
        let saved = PrincipalRepository::save(&store, widened).await.unwrap();

        let report = saved.find_limit(Some("quota"), "Report").unwrap();
        assert_eq!((report.value, report.max_allowed), (1, 3));
        assert_eq!(saved.find_limit(Some("quota"), "Audit").unwrap().value, 1);
        assert_eq!(store.increment(&tom, "quota", "Report").await.unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_rejected_save_writes_no_claims() {
        let store = store_with_realm().await;
        let err = RoleRepository::save(
            &store,
            Role::new("banking", "Broken")
                .with_claim(Claim::new("banking", "read", "X"))
                .with_claim(Claim::new("banking", "", "Y")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::Validation(_)));

        let err = PrincipalRepository::save(
            &store,
            Principal::new("banking", "tom")
                .with_claim(Claim::new("banking", "read", "X"))
                .with_claim(Claim::new("retail", "read", "Y")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { entity: "Realm", .. }));

        let all = ClaimRepository::search(&store, &ClaimFilter::new())
            .await
            .unwrap();
        assert!(all.is_empty());
        assert!(RoleRepository::find_by_name(&store, "banking", "Broken")
            .await
            .unwrap()
            .is_none());
    }
}
