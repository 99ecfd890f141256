//! Loading realms, claims, roles and principals from YAML or JSON.
//!
//! ```yaml
//! realms:
//!   - name: banking
//!     roles:
//!       - name: Teller
//!         parents: [Employee]
//!         claims:
//!           - action: (read|modify)
//!             resource: DepositAccount
//!             condition: employeeRegion == 'MIDWEST'
//!       - name: Employee
//!     principals:
//!       - name: tom
//!         roles: [Teller]
//!         properties: { employeeRegion: MIDWEST }
//!         limits:
//!           - { type: quota, resource: Report, maxAllowed: 2, expirationDate: 2030-12-31 }
//! ```
//!
//! Roles may be listed in any order; parents are saved before children.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::context::AuthzContext;
use crate::error::FixtureError;
use crate::model::{Claim, Limit, Principal, Realm, Role};
use crate::types::{Context, Effect};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub realms: Vec<RealmFixture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmFixture {
    pub name: String,
    #[serde(default)]
    pub claims: Vec<ClaimFixture>,
    #[serde(default)]
    pub roles: Vec<RoleFixture>,
    #[serde(default)]
    pub principals: Vec<PrincipalFixture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimFixture {
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub effect: Effect,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleFixture {
    pub name: String,
    #[serde(default)]
    pub claims: Vec<ClaimFixture>,
    /// Parent role names in the same realm.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitFixture {
    #[serde(rename = "type")]
    pub limit_type: String,
    pub resource: String,
    pub max_allowed: i64,
    #[serde(default)]
    pub value: i64,
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalFixture {
    pub name: String,
    #[serde(default)]
    pub claims: Vec<ClaimFixture>,
    /// Role names in the same realm.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub limits: Vec<LimitFixture>,
    #[serde(default)]
    pub properties: Context,
}

/// Counts of what [`Fixture::apply`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixtureSummary {
    pub realms: usize,
    pub claims: usize,
    pub roles: usize,
    pub principals: usize,
}

impl ClaimFixture {
    fn to_claim(&self, realm: &str) -> Claim {
        let mut claim = Claim::new(realm, self.action.clone(), self.resource.clone())
            .with_effect(self.effect)
            .with_validity(self.start_date, self.end_date);
        claim.condition = self.condition.clone();
        claim
    }
}

impl Fixture {
    pub fn from_yaml_str(source: &str) -> Result<Self, FixtureError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Reads a `.json` file as JSON and anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        }
    }

    /// Writes the fixture through the context's repositories. Realms that
    /// already exist are reused.
    pub async fn apply(&self, ctx: &AuthzContext) -> Result<FixtureSummary, FixtureError> {
        let mut summary = FixtureSummary::default();

        for realm in &self.realms {
            if realm.name.trim().is_empty() {
                return Err(FixtureError::Invalid("realm name is empty".to_string()));
            }

            if ctx.realms.find_by_name(&realm.name).await?.is_none() {
                ctx.realms.save(Realm::new(realm.name.clone())).await?;
                summary.realms += 1;
            }

            for claim in &realm.claims {
                ctx.claims.save(claim.to_claim(&realm.name)).await?;
                summary.claims += 1;
            }

            for role in ordered_roles(&realm.roles)? {
                ctx.roles.save(build_role(&realm.name, role)).await?;
                summary.roles += 1;
            }

            for principal in &realm.principals {
                ctx.principals
                    .save(build_principal(&realm.name, principal))
                    .await?;
                summary.principals += 1;
            }

            debug!("Applied fixture realm {}", realm.name);
        }

        info!(
            realms = summary.realms,
            claims = summary.claims,
            roles = summary.roles,
            principals = summary.principals,
            "Fixture applied"
        );
        Ok(summary)
    }
}

/// Orders roles so that every parent defined in the fixture precedes its
/// children. Parents not defined here must already be stored.
fn ordered_roles(roles: &[RoleFixture]) -> Result<Vec<&RoleFixture>, FixtureError> {
    let defined: HashSet<&str> = roles.iter().map(|r| r.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(roles.len());
    let mut pending: Vec<&RoleFixture> = roles.iter().collect();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<&RoleFixture>, Vec<&RoleFixture>) =
            pending.into_iter().partition(|role| {
                role.parents
                    .iter()
                    .all(|p| !defined.contains(p.as_str()) || placed.contains(p.as_str()))
            });

        if ready.is_empty() {
            let names: Vec<&str> = blocked.iter().map(|r| r.name.as_str()).collect();
            return Err(FixtureError::Invalid(format!(
                "role parents form a cycle: {}",
                names.join(", ")
            )));
        }

        for role in ready {
            placed.insert(role.name.as_str());
            ordered.push(role);
        }
        pending = blocked;
    }

    Ok(ordered)
}

fn build_role(realm: &str, fixture: &RoleFixture) -> Role {
    let mut role = Role::new(realm, fixture.name.clone())
        .with_validity(fixture.start_date, fixture.end_date);
    for claim in &fixture.claims {
        role.add_claim(claim.to_claim(realm));
    }
    for parent in &fixture.parents {
        role.add_parent(Role::new(realm, parent.clone()));
    }
    role
}

fn build_principal(realm: &str, fixture: &PrincipalFixture) -> Principal {
    let mut principal = Principal::new(realm, fixture.name.clone());
    for claim in &fixture.claims {
        principal.add_claim(claim.to_claim(realm));
    }
    for role in &fixture.roles {
        principal.add_role(Role::new(realm, role.clone()));
    }
    for limit in &fixture.limits {
        principal.add_limit(
            Limit::new(
                limit.limit_type.clone(),
                limit.resource.clone(),
                limit.max_allowed,
                limit.expiration_date,
            )
            .with_value(limit.value),
        );
    }
    principal.properties = fixture.properties.clone();
    principal
}
