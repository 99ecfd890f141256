//! Roles: named, inheritable bundles of claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use super::claim::{within_window, Claim, KEY_SEPARATOR};
use super::unique::{Keyed, UniqueSet};

/// A role with its own claims and any number of parent roles.
///
/// Parents are held resolved (by value); repositories rebuild the graph from
/// stored references on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub realm: String,

    pub role_name: String,

    #[serde(default)]
    pub claims: UniqueSet<Claim>,

    #[serde(default)]
    pub parents: UniqueSet<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new(realm: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            id: None,
            realm: realm.into(),
            role_name: role_name.into(),
            claims: UniqueSet::new(),
            parents: UniqueSet::new(),
            start_date: None,
            end_date: None,
        }
    }

    /// Builder form of [`Role::add_claim`].
    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.add_claim(claim);
        self
    }

    /// Builder form of [`Role::add_parent`].
    pub fn with_parent(mut self, parent: Role) -> Self {
        self.add_parent(parent);
        self
    }

    pub fn with_validity(
        mut self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn add_claim(&mut self, claim: Claim) -> bool {
        self.claims.insert(claim)
    }

    pub fn remove_claim(&mut self, claim: &Claim) -> Option<Claim> {
        self.claims.remove(claim)
    }

    pub fn add_parent(&mut self, parent: Role) -> bool {
        self.parents.insert(parent)
    }

    pub fn remove_parent(&mut self, parent: &Role) -> Option<Role> {
        self.parents.remove(parent)
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        within_window(self.start_date, self.end_date, at)
    }

    /// Own claims followed by every ancestor's claims, depth-first.
    pub fn all_claims(&self) -> UniqueSet<Claim> {
        let mut out = UniqueSet::new();
        let mut walk = RoleWalk::new(None);
        walk.collect(self, &mut out);
        out
    }

    /// Like [`Role::all_claims`] but skipping roles outside their validity
    /// window at `at` (and, with them, their ancestors).
    pub fn active_claims_at(&self, at: DateTime<Utc>) -> UniqueSet<Claim> {
        let mut out = UniqueSet::new();
        let mut walk = RoleWalk::new(Some(at));
        walk.collect(self, &mut out);
        out
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.realm.trim().is_empty() {
            return Err("role realm is required".to_string());
        }
        if self.role_name.trim().is_empty() {
            return Err("roleName is required".to_string());
        }
        Ok(())
    }
}

impl Keyed for Role {
    fn unique_key(&self) -> String {
        format!("{}{}{}", self.realm, KEY_SEPARATOR, self.role_name)
    }
}

/// Depth-first traversal state shared across the roles of one aggregation.
pub(crate) struct RoleWalk {
    at: Option<DateTime<Utc>>,
    visited: HashSet<String>,
    path: Vec<String>,
}

impl RoleWalk {
    pub(crate) fn new(at: Option<DateTime<Utc>>) -> Self {
        Self {
            at,
            visited: HashSet::new(),
            path: Vec::new(),
        }
    }

    pub(crate) fn collect(&mut self, role: &Role, out: &mut UniqueSet<Claim>) {
        let key = role.unique_key();

        if self.path.contains(&key) {
            warn!(
                "Role cycle detected at '{}' (path: {}), skipping",
                role.role_name,
                self.path.join(" -> ")
            );
            return;
        }
        if !self.visited.insert(key.clone()) {
            return;
        }
        if let Some(at) = self.at {
            if !role.is_active_at(at) {
                return;
            }
        }

        out.extend(role.claims.iter().cloned());

        self.path.push(key);
        for parent in role.parents.iter() {
            self.collect(parent, out);
        }
        self.path.pop();
    }
}
