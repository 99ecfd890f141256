//! Principals: the subjects being authorized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::{Claim, KEY_SEPARATOR};
use super::limit::Limit;
use super::role::{Role, RoleWalk};
use super::unique::{Keyed, UniqueSet};
use crate::types::Context;

/// A user or service holding direct claims, roles and usage limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub realm: String,

    pub principal_name: String,

    /// Direct grants.
    #[serde(default)]
    pub claims: UniqueSet<Claim>,

    #[serde(default)]
    pub roles: UniqueSet<Role>,

    #[serde(default)]
    pub limits: UniqueSet<Limit>,

    /// Attributes merged into every condition context for this principal.
    #[serde(default)]
    pub properties: Context,
}

impl Principal {
    pub fn new(realm: impl Into<String>, principal_name: impl Into<String>) -> Self {
        Self {
            id: None,
            realm: realm.into(),
            principal_name: principal_name.into(),
            claims: UniqueSet::new(),
            roles: UniqueSet::new(),
            limits: UniqueSet::new(),
            properties: Context::new(),
        }
    }

    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.add_claim(claim);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.add_role(role);
        self
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.add_limit(limit);
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn add_claim(&mut self, claim: Claim) -> bool {
        self.claims.insert(claim)
    }

    pub fn remove_claim(&mut self, claim: &Claim) -> Option<Claim> {
        self.claims.remove(claim)
    }

    pub fn add_role(&mut self, role: Role) -> bool {
        self.roles.insert(role)
    }

    pub fn remove_role(&mut self, role: &Role) -> Option<Role> {
        self.roles.remove(role)
    }

    pub fn add_limit(&mut self, limit: Limit) -> bool {
        self.limits.insert(limit)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Finds a limit by resource, optionally restricted to a limit type.
    /// The first limit in insertion order wins.
    pub fn find_limit(&self, limit_type: Option<&str>, resource: &str) -> Option<&Limit> {
        self.limits.iter().find(|l| {
            l.resource == resource && limit_type.map_or(true, |t| l.limit_type == t)
        })
    }

    /// The effective permission set: direct claims, then every role's claims
    /// (each role depth-first through its parents), de-duplicated by key.
    pub fn all_claims(&self) -> UniqueSet<Claim> {
        self.aggregate(RoleWalk::new(None), |_| true)
    }

    /// [`Principal::all_claims`] restricted to claims and roles whose
    /// validity window contains `at`.
    pub fn active_claims_at(&self, at: DateTime<Utc>) -> UniqueSet<Claim> {
        self.aggregate(RoleWalk::new(Some(at)), |c| c.is_active_at(at))
    }

    fn aggregate(&self, mut walk: RoleWalk, keep: impl Fn(&Claim) -> bool) -> UniqueSet<Claim> {
        let mut out: UniqueSet<Claim> = self.claims.iter().cloned().collect();
        for role in self.roles.iter() {
            walk.collect(role, &mut out);
        }
        out.into_iter().filter(|c| keep(c)).collect()
    }

    /// Context keys derived from every valid limit at `at`.
    pub fn limit_context_at(&self, at: DateTime<Utc>) -> Context {
        let mut context = Context::new();
        for limit in self.limits.iter().filter(|l| l.is_valid_at(at)) {
            limit.write_context(&mut context);
        }
        context
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.realm.trim().is_empty() {
            return Err("principal realm is required".to_string());
        }
        if self.principal_name.trim().is_empty() {
            return Err("principalName is required".to_string());
        }
        Ok(())
    }
}

impl Keyed for Principal {
    fn unique_key(&self) -> String {
        format!("{}{}{}", self.realm, KEY_SEPARATOR, self.principal_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn claim(action: &str, resource: &str) -> Claim {
        Claim::new("banking", action, resource)
    }

    #[test]
    fn test_all_claims_order_direct_then_roles() {
        let r1 = Role::new("banking", "R1").with_claim(claim("read", "C1"));
        let r2 = Role::new("banking", "R2")
            .with_claim(claim("read", "C2"))
            .with_parent(r1);
        let r3 = Role::new("banking", "R3").with_claim(claim("read", "C3"));

        let principal = Principal::new("banking", "tom")
            .with_claim(claim("read", "D"))
            .with_role(r2)
            .with_role(r3);

        let resources: Vec<String> = principal
            .all_claims()
            .iter()
            .map(|c| c.resource.clone())
            .collect();
        assert_eq!(resources, vec!["D", "C2", "C1", "C3"]);
    }

    #[test]
    fn test_claim_via_two_paths_counts_once() {
        let shared = claim("read", "Shared");
        let r1 = Role::new("banking", "R1").with_claim(shared.clone());
        let r2 = Role::new("banking", "R2").with_claim(shared.clone());

        let principal = Principal::new("banking", "tom")
            .with_claim(shared)
            .with_role(r1)
            .with_role(r2);

        assert_eq!(principal.all_claims().len(), 1);
    }

    #[test]
    fn test_shared_parent_visited_once() {
        let base = Role::new("banking", "Employee").with_claim(claim("read", "Directory"));
        let r1 = Role::new("banking", "Teller").with_parent(base.clone());
        let r2 = Role::new("banking", "Clerk").with_parent(base);

        let principal = Principal::new("banking", "tom").with_role(r1).with_role(r2);
        assert_eq!(principal.all_claims().len(), 1);
    }

    #[test]
    fn test_active_claims_skip_expired() {
        let now = Utc::now();
        let expired = claim("read", "Old").with_validity(None, Some(now - Duration::hours(1)));
        let principal = Principal::new("banking", "tom")
            .with_claim(expired)
            .with_claim(claim("read", "New"));

        assert_eq!(principal.all_claims().len(), 2);
        let active = principal.active_claims_at(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active.iter().next().unwrap().resource, "New");
    }

    #[test]
    fn test_limit_context_only_valid_limits() {
        let now = Utc::now();
        let future = (now + Duration::days(30)).date_naive();
        let past = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();

        let principal = Principal::new("banking", "tom")
            .with_limit(Limit::new("quota", "Report", 2, future).with_value(1))
            .with_limit(Limit::new("quota", "Export", 2, past));

        let context = principal.limit_context_at(now);
        assert_eq!(context["Report_value"], 1);
        assert_eq!(context["Report_maxAllowed"], 2);
        assert!(!context.contains_key("Export_value"));
    }

    #[test]
    fn test_find_limit() {
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let principal = Principal::new("banking", "tom")
            .with_limit(Limit::new("quota", "Report", 2, date))
            .with_limit(Limit::new("daily", "Report", 5, date));

        assert_eq!(principal.find_limit(None, "Report").unwrap().limit_type, "quota");
        assert_eq!(
            principal.find_limit(Some("daily"), "Report").unwrap().max_allowed,
            5
        );
        assert!(principal.find_limit(None, "Missing").is_none());
    }

    #[test]
    fn test_properties() {
        let principal = Principal::new("banking", "tom").with_property("employeeRegion", "MIDWEST");
        assert_eq!(principal.properties["employeeRegion"], "MIDWEST");
    }
}
