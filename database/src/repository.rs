//! `authz` repository traits backed by SQLite.

use async_trait::async_trait;
use authz::repository::new_id;
use authz::{
    Claim, ClaimFilter, ClaimRepository, Context, Effect, Keyed, Limit, PersistenceError,
    Principal, PrincipalFilter, PrincipalRepository, Realm, RealmRepository, Role, RoleFilter,
    RoleRepository, UniqueSet,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Database, DatabaseError, Result};

const CLAIM_COLUMNS: &str =
    "c.id, c.realm, c.action, c.resource, c.condition, c.effect, c.start_date, c.end_date";

/// Seeds the recursive ancestor query for one role.
const ROLE_SEED: &str = "SELECT ?";

/// Seeds the recursive ancestor query for all roles of one principal.
const PRINCIPAL_SEED: &str = "SELECT role_id FROM principal_roles WHERE principal_id = ?";

/// Shared handle implementing all four repositories over one pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }
}

fn claim_from_row(row: &SqliteRow) -> Result<Claim> {
    let effect: String = row.try_get("effect")?;
    let condition: String = row.try_get("condition")?;
    Ok(Claim {
        id: Some(row.try_get("id")?),
        realm: row.try_get("realm")?,
        action: row.try_get("action")?,
        resource: row.try_get("resource")?,
        condition: (!condition.is_empty()).then_some(condition),
        effect: effect
            .parse::<Effect>()
            .map_err(DatabaseError::CorruptRow)?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
    })
}

fn limit_from_row(row: &SqliteRow, principal_id: &str) -> Result<Limit> {
    Ok(Limit {
        id: Some(row.try_get("id")?),
        limit_type: row.try_get("limit_type")?,
        resource: row.try_get("resource")?,
        max_allowed: row.try_get("max_allowed")?,
        value: row.try_get("value")?,
        expiration_date: row.try_get("expiration_date")?,
        principal_id: Some(principal_id.to_string()),
    })
}

async fn require_realm(conn: &mut SqliteConnection, realm: &str) -> Result<()> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM realms WHERE realm_name = ?")
        .bind(realm)
        .fetch_optional(&mut *conn)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(PersistenceError::not_found("Realm", realm).into()),
    }
}

/// Inserts or updates a claim. With `upsert`, a new claim whose key already
/// exists adopts that row's id instead of failing.
async fn store_claim(conn: &mut SqliteConnection, mut claim: Claim, upsert: bool) -> Result<Claim> {
    claim.validate().map_err(PersistenceError::Validation)?;
    require_realm(conn, &claim.realm).await?;

    let condition = claim.condition.clone().unwrap_or_default();
    let by_key: Option<String> = sqlx::query_scalar(
        "SELECT id FROM claims WHERE realm = ? AND action = ? AND resource = ? AND condition = ?",
    )
    .bind(&claim.realm)
    .bind(&claim.action)
    .bind(&claim.resource)
    .bind(&condition)
    .fetch_optional(&mut *conn)
    .await?;

    let by_id: Option<String> = match claim.id.as_deref() {
        Some(id) => {
            sqlx::query_scalar("SELECT id FROM claims WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        }
        None => None,
    };

    let existing = match (by_id, by_key) {
        (Some(id), Some(key_id)) if id != key_id => {
            return Err(PersistenceError::duplicate("Claim", claim.unique_key()).into());
        }
        (Some(id), _) => Some(id),
        (None, Some(key_id)) if upsert => Some(key_id),
        (None, Some(_)) => {
            return Err(PersistenceError::duplicate("Claim", claim.unique_key()).into());
        }
        (None, None) => None,
    };

    let sql = match existing {
        Some(id) => {
            claim.id = Some(id);
            r#"
            UPDATE claims SET realm = ?, action = ?, resource = ?, condition = ?,
                effect = ?, start_date = ?, end_date = ?
            WHERE id = ?
            "#
        }
        None => {
            claim.id.get_or_insert_with(new_id);
            r#"
            INSERT INTO claims (realm, action, resource, condition, effect, start_date, end_date, id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#
        }
    };

    sqlx::query(sql)
        .bind(&claim.realm)
        .bind(&claim.action)
        .bind(&claim.resource)
        .bind(&condition)
        .bind(claim.effect.as_str())
        .bind(claim.start_date)
        .bind(claim.end_date)
        .bind(claim.id.as_deref())
        .execute(&mut *conn)
        .await?;

    Ok(claim)
}

/// Finds a stored role by id, falling back to `(realm, role_name)`.
async fn resolve_role_id(conn: &mut SqliteConnection, role: &Role) -> Result<String> {
    if let Some(id) = role.id.as_deref() {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(found) = found {
            return Ok(found);
        }
    }

    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM roles WHERE realm = ? AND role_name = ?")
            .bind(&role.realm)
            .bind(&role.role_name)
            .fetch_optional(&mut *conn)
            .await?;
    found.ok_or_else(|| PersistenceError::not_found("Role", role.role_name.clone()).into())
}

/// Is `target` an ancestor of (or equal to) `from`?
async fn reaches(conn: &mut SqliteConnection, from: &str, target: &str) -> Result<bool> {
    let found: i64 = sqlx::query_scalar(
        r#"
        WITH RECURSIVE ancestors(id) AS (
            SELECT ?
            UNION
            SELECT rp.parent_id FROM role_parents rp JOIN ancestors a ON rp.role_id = a.id
        )
        SELECT EXISTS(SELECT 1 FROM ancestors WHERE id = ?)
        "#,
    )
    .bind(from)
    .bind(target)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found != 0)
}

/// Replaces the ordered id list in a join table.
async fn replace_links(
    conn: &mut SqliteConnection,
    table: &str,
    owner_column: &str,
    item_column: &str,
    owner_id: &str,
    item_ids: &[String],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE {} = ?", table, owner_column))
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    let insert = format!(
        "INSERT INTO {} ({}, {}, position) VALUES (?, ?, ?)",
        table, owner_column, item_column
    );
    for (position, item_id) in item_ids.iter().enumerate() {
        sqlx::query(&insert)
            .bind(owner_id)
            .bind(item_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Writes a principal's limits. Limits matching a stored row (by id, then by
/// type and resource) update its bounds and keep its `value`; only new limits
/// take the caller's value. Stored limits no longer listed are removed.
async fn save_limits(
    conn: &mut SqliteConnection,
    principal_id: &str,
    limits: &UniqueSet<Limit>,
) -> Result<()> {
    for limit in limits.iter() {
        limit.validate().map_err(PersistenceError::Validation)?;
    }

    let existing: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, limit_type, resource FROM limits WHERE principal_id = ?")
            .bind(principal_id)
            .fetch_all(&mut *conn)
            .await?;

    let matched: Vec<Option<String>> = limits
        .iter()
        .map(|limit| {
            existing
                .iter()
                .find(|(row_id, _, _)| limit.id.as_deref() == Some(row_id.as_str()))
                .or_else(|| {
                    existing.iter().find(|(_, limit_type, resource)| {
                        *limit_type == limit.limit_type && *resource == limit.resource
                    })
                })
                .map(|(row_id, _, _)| row_id.clone())
        })
        .collect();

    for (row_id, _, _) in &existing {
        if !matched.iter().flatten().any(|kept| kept == row_id) {
            sqlx::query("DELETE FROM limits WHERE id = ?")
                .bind(row_id)
                .execute(&mut *conn)
                .await?;
        }
    }

    for (position, (limit, row_id)) in limits.iter().zip(&matched).enumerate() {
        match row_id {
            Some(row_id) => {
                sqlx::query(
                    r#"
                    UPDATE limits SET limit_type = ?, resource = ?, max_allowed = ?,
                        expiration_date = ?, position = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&limit.limit_type)
                .bind(&limit.resource)
                .bind(limit.max_allowed)
                .bind(limit.expiration_date)
                .bind(position as i64)
                .bind(row_id)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO limits
                        (id, principal_id, limit_type, resource, max_allowed, value, expiration_date, position)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(limit.id.clone().unwrap_or_else(new_id))
                .bind(principal_id)
                .bind(&limit.limit_type)
                .bind(&limit.resource)
                .bind(limit.max_allowed)
                .bind(limit.value)
                .bind(limit.expiration_date)
                .bind(position as i64)
                .execute(&mut *conn)
                .await?;
            }
        }
    }
    Ok(())
}

/// Every role reachable from a seed set, loaded with three queries and
/// assembled in memory.
#[derive(Default)]
struct RoleGraph {
    roles: HashMap<String, Role>,
    claims: HashMap<String, Vec<Claim>>,
    parents: HashMap<String, Vec<String>>,
}

impl RoleGraph {
    async fn load(pool: &SqlitePool, seed: &str, seed_arg: &str) -> Result<Self> {
        let ancestors = format!(
            r#"
            WITH RECURSIVE ancestors(id) AS (
                {}
                UNION
                SELECT rp.parent_id FROM role_parents rp JOIN ancestors a ON rp.role_id = a.id
            )
            "#,
            seed
        );

        let mut graph = RoleGraph::default();

        let rows = sqlx::query(&format!(
            "{} SELECT r.id, r.realm, r.role_name, r.start_date, r.end_date \
             FROM roles r JOIN ancestors a ON r.id = a.id",
            ancestors
        ))
        .bind(seed_arg)
        .fetch_all(pool)
        .await?;
        for row in rows {
            let id: String = row.try_get("id")?;
            let mut role = Role::new(
                row.try_get::<String, _>("realm")?,
                row.try_get::<String, _>("role_name")?,
            );
            role.id = Some(id.clone());
            role.start_date = row.try_get("start_date")?;
            role.end_date = row.try_get("end_date")?;
            graph.roles.insert(id, role);
        }

        let rows = sqlx::query(&format!(
            "{} SELECT rc.role_id AS owner_id, {} FROM role_claims rc \
             JOIN claims c ON c.id = rc.claim_id \
             WHERE rc.role_id IN (SELECT id FROM ancestors) \
             ORDER BY rc.role_id, rc.position",
            ancestors, CLAIM_COLUMNS
        ))
        .bind(seed_arg)
        .fetch_all(pool)
        .await?;
        for row in rows {
            let owner: String = row.try_get("owner_id")?;
            graph
                .claims
                .entry(owner)
                .or_default()
                .push(claim_from_row(&row)?);
        }

        let rows = sqlx::query(&format!(
            "{} SELECT role_id, parent_id FROM role_parents \
             WHERE role_id IN (SELECT id FROM ancestors) \
             ORDER BY role_id, position",
            ancestors
        ))
        .bind(seed_arg)
        .fetch_all(pool)
        .await?;
        for row in rows {
            let role_id: String = row.try_get("role_id")?;
            graph
                .parents
                .entry(role_id)
                .or_default()
                .push(row.try_get("parent_id")?);
        }

        Ok(graph)
    }

    fn assemble(&self, id: &str, path: &mut Vec<String>) -> Option<Role> {
        let mut role = self.roles.get(id)?.clone();
        if let Some(claims) = self.claims.get(id) {
            role.claims = claims.iter().cloned().collect();
        }

        path.push(id.to_string());
        for parent_id in self.parents.get(id).into_iter().flatten() {
            if path.contains(parent_id) {
                warn!(
                    "Stored role graph is cyclic at '{}', parent link ignored",
                    role.role_name
                );
                continue;
            }
            if let Some(parent) = self.assemble(parent_id, path) {
                role.parents.insert(parent);
            }
        }
        path.pop();

        Some(role)
    }
}

impl SqliteStore {
    async fn load_role(&self, id: &str) -> Result<Option<Role>> {
        let graph = RoleGraph::load(self.pool(), ROLE_SEED, id).await?;
        Ok(graph.assemble(id, &mut Vec::new()))
    }

    async fn load_principal(&self, row: &SqliteRow) -> Result<Principal> {
        let id: String = row.try_get("id")?;
        let properties: String = row.try_get("properties")?;

        let mut principal = Principal::new(
            row.try_get::<String, _>("realm")?,
            row.try_get::<String, _>("principal_name")?,
        );
        principal.id = Some(id.clone());
        principal.properties = serde_json::from_str::<Context>(&properties)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM principal_claims pc JOIN claims c ON c.id = pc.claim_id \
             WHERE pc.principal_id = ? ORDER BY pc.position",
            CLAIM_COLUMNS
        ))
        .bind(&id)
        .fetch_all(self.pool())
        .await?;
        for row in &rows {
            principal.add_claim(claim_from_row(row)?);
        }

        let role_ids: Vec<String> = sqlx::query_scalar(
            "SELECT role_id FROM principal_roles WHERE principal_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(self.pool())
        .await?;
        if !role_ids.is_empty() {
            let graph = RoleGraph::load(self.pool(), PRINCIPAL_SEED, &id).await?;
            for role_id in &role_ids {
                if let Some(role) = graph.assemble(role_id, &mut Vec::new()) {
                    principal.add_role(role);
                }
            }
        }

        let rows = sqlx::query(
            "SELECT id, limit_type, resource, max_allowed, value, expiration_date \
             FROM limits WHERE principal_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(self.pool())
        .await?;
        for row in &rows {
            principal.add_limit(limit_from_row(row, &id)?);
        }

        Ok(principal)
    }

    async fn principal_id(&self, principal: &Principal) -> Result<String> {
        if let Some(id) = principal.id.clone() {
            return Ok(id);
        }
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM principals WHERE realm = ? AND principal_name = ?")
                .bind(&principal.realm)
                .bind(&principal.principal_name)
                .fetch_optional(self.pool())
                .await?;
        found.ok_or_else(|| {
            PersistenceError::not_found("Principal", principal.principal_name.clone()).into()
        })
    }

    async fn save_role(&self, mut role: Role) -> Result<Role> {
        role.validate().map_err(PersistenceError::Validation)?;
        let mut tx = self.pool().begin().await?;
        require_realm(&mut tx, &role.realm).await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM roles WHERE realm = ? AND role_name = ?")
                .bind(&role.realm)
                .bind(&role.role_name)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(existing) = existing {
            if role.id.as_deref() != Some(existing.as_str()) {
                return Err(PersistenceError::duplicate("Role", role.role_name).into());
            }
        }
        if role.parents.contains_key(&role.unique_key()) {
            return Err(PersistenceError::CyclicRole(role.role_name).into());
        }

        let mut parent_ids = Vec::with_capacity(role.parents.len());
        for parent in role.parents.iter() {
            parent_ids.push(resolve_role_id(&mut tx, parent).await?);
        }

        let id = role.id.get_or_insert_with(new_id).clone();
        for parent_id in &parent_ids {
            if reaches(&mut tx, parent_id, &id).await? {
                return Err(PersistenceError::CyclicRole(role.role_name).into());
            }
        }

        sqlx::query(
            r#"
            INSERT INTO roles (id, realm, role_name, start_date, end_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                realm = excluded.realm,
                role_name = excluded.role_name,
                start_date = excluded.start_date,
                end_date = excluded.end_date
            "#,
        )
        .bind(&id)
        .bind(&role.realm)
        .bind(&role.role_name)
        .bind(role.start_date)
        .bind(role.end_date)
        .execute(&mut *tx)
        .await?;

        let mut claim_ids = Vec::with_capacity(role.claims.len());
        for claim in role.claims.iter() {
            let saved = store_claim(&mut tx, claim.clone(), true).await?;
            claim_ids.extend(saved.id);
        }

        replace_links(&mut tx, "role_claims", "role_id", "claim_id", &id, &claim_ids).await?;
        replace_links(&mut tx, "role_parents", "role_id", "parent_id", &id, &parent_ids).await?;
        tx.commit().await?;

        debug!("Saved role {}/{}", role.realm, role.role_name);
        self.load_role(&id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Role", id).into())
    }

    async fn save_principal(&self, mut principal: Principal) -> Result<Principal> {
        principal
            .validate()
            .map_err(PersistenceError::Validation)?;
        let mut tx = self.pool().begin().await?;
        require_realm(&mut tx, &principal.realm).await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM principals WHERE realm = ? AND principal_name = ?")
                .bind(&principal.realm)
                .bind(&principal.principal_name)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(existing) = existing {
            if principal.id.as_deref() != Some(existing.as_str()) {
                return Err(
                    PersistenceError::duplicate("Principal", principal.principal_name).into(),
                );
            }
        }

        let mut role_ids = Vec::with_capacity(principal.roles.len());
        for role in principal.roles.iter() {
            role_ids.push(resolve_role_id(&mut tx, role).await?);
        }

        let id = principal.id.get_or_insert_with(new_id).clone();
        sqlx::query(
            r#"
            INSERT INTO principals (id, realm, principal_name, properties)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                realm = excluded.realm,
                principal_name = excluded.principal_name,
                properties = excluded.properties
            "#,
        )
        .bind(&id)
        .bind(&principal.realm)
        .bind(&principal.principal_name)
        .bind(serde_json::to_string(&principal.properties)?)
        .execute(&mut *tx)
        .await?;

        let mut claim_ids = Vec::with_capacity(principal.claims.len());
        for claim in principal.claims.iter() {
            let saved = store_claim(&mut tx, claim.clone(), true).await?;
            claim_ids.extend(saved.id);
        }
        replace_links(
            &mut tx,
            "principal_claims",
            "principal_id",
            "claim_id",
            &id,
            &claim_ids,
        )
        .await?;
        replace_links(
            &mut tx,
            "principal_roles",
            "principal_id",
            "role_id",
            &id,
            &role_ids,
        )
        .await?;

        save_limits(&mut tx, &id, &principal.limits).await?;

        tx.commit().await?;

        debug!(
            "Saved principal {}/{}",
            principal.realm, principal.principal_name
        );
        let row = sqlx::query("SELECT id, realm, principal_name, properties FROM principals WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await?;
        self.load_principal(&row).await
    }

    async fn increment_limit(
        &self,
        principal: &Principal,
        limit_type: &str,
        resource: &str,
    ) -> Result<Limit> {
        let principal_id = self.principal_id(principal).await?;

        // One statement, so concurrent callers can never push value past
        // max_allowed.
        let updated = sqlx::query(
            r#"
            UPDATE limits SET value = value + 1
            WHERE principal_id = ? AND limit_type = ? AND resource = ? AND value < max_allowed
            RETURNING id, limit_type, resource, max_allowed, value, expiration_date
            "#,
        )
        .bind(&principal_id)
        .bind(limit_type)
        .bind(resource)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = updated {
            let limit = limit_from_row(&row, &principal_id)?;
            debug!(
                "Incremented {} limit on {} for {} to {}/{}",
                limit_type, resource, principal.principal_name, limit.value, limit.max_allowed
            );
            return Ok(limit);
        }

        let current = sqlx::query(
            "SELECT id, limit_type, resource, max_allowed, value, expiration_date \
             FROM limits WHERE principal_id = ? AND limit_type = ? AND resource = ?",
        )
        .bind(&principal_id)
        .bind(limit_type)
        .bind(resource)
        .fetch_optional(self.pool())
        .await?;

        match current {
            Some(row) => {
                let limit = limit_from_row(&row, &principal_id)?;
                Err(PersistenceError::LimitExhausted {
                    limit_type: limit.limit_type,
                    resource: limit.resource,
                    value: limit.value,
                    max_allowed: limit.max_allowed,
                }
                .into())
            }
            None => Err(
                PersistenceError::not_found("Limit", format!("{}/{}", limit_type, resource))
                    .into(),
            ),
        }
    }

    async fn remove(&self, table: &str, entity: &'static str, id: &str) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table))
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found(entity, id).into());
        }
        debug!("Removed {} {}", entity, id);
        Ok(())
    }
}

fn realm_from_row(row: &SqliteRow) -> Result<Realm> {
    Ok(Realm {
        id: Some(row.try_get("id")?),
        realm_name: row.try_get("realm_name")?,
    })
}

#[async_trait]
impl RealmRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> authz::Result<Option<Realm>> {
        let row = sqlx::query("SELECT id, realm_name FROM realms WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(DatabaseError::from)?;
        Ok(row.as_ref().map(realm_from_row).transpose()?)
    }

    async fn find_by_name(&self, realm_name: &str) -> authz::Result<Option<Realm>> {
        let row = sqlx::query("SELECT id, realm_name FROM realms WHERE realm_name = ?")
            .bind(realm_name)
            .fetch_optional(self.pool())
            .await
            .map_err(DatabaseError::from)?;
        Ok(row.as_ref().map(realm_from_row).transpose()?)
    }

    async fn save(&self, mut realm: Realm) -> authz::Result<Realm> {
        realm.validate().map_err(PersistenceError::Validation)?;
        if RealmRepository::find_by_name(self, &realm.realm_name)
            .await?
            .is_some()
        {
            return Err(PersistenceError::duplicate("Realm", realm.realm_name));
        }

        let id = realm.id.get_or_insert_with(new_id).clone();
        sqlx::query("INSERT INTO realms (id, realm_name) VALUES (?, ?)")
            .bind(&id)
            .bind(&realm.realm_name)
            .execute(self.pool())
            .await
            .map_err(DatabaseError::from)?;

        debug!("Created realm {}", realm.realm_name);
        Ok(realm)
    }

    async fn close(&self) -> authz::Result<()> {
        self.db.close().await;
        Ok(())
    }
}

#[async_trait]
impl ClaimRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> authz::Result<Option<Claim>> {
        let row = sqlx::query(&format!("SELECT {} FROM claims c WHERE c.id = ?", CLAIM_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(DatabaseError::from)?;
        Ok(row.as_ref().map(claim_from_row).transpose()?)
    }

    async fn save(&self, claim: Claim) -> authz::Result<Claim> {
        let mut conn = self.pool().acquire().await.map_err(DatabaseError::from)?;
        Ok(store_claim(&mut conn, claim, false).await?)
    }

    async fn search(&self, filter: &ClaimFilter) -> authz::Result<Vec<Claim>> {
        let effect = filter.effect.map(Effect::as_str);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM claims c \
             WHERE (?1 IS NULL OR c.realm = ?1) AND (?2 IS NULL OR c.action = ?2) \
             AND (?3 IS NULL OR c.resource = ?3) AND (?4 IS NULL OR c.effect = ?4) \
             ORDER BY c.rowid",
            CLAIM_COLUMNS
        ))
        .bind(filter.realm.as_deref())
        .bind(filter.action.as_deref())
        .bind(filter.resource.as_deref())
        .bind(effect)
        .fetch_all(self.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .iter()
            .map(claim_from_row)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn remove_by_id(&self, id: &str) -> authz::Result<()> {
        Ok(self.remove("claims", "Claim", id).await?)
    }

    async fn close(&self) -> authz::Result<()> {
        self.db.close().await;
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> authz::Result<Option<Role>> {
        Ok(self.load_role(id).await?)
    }

    async fn find_by_name(&self, realm: &str, role_name: &str) -> authz::Result<Option<Role>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM roles WHERE realm = ? AND role_name = ?")
                .bind(realm)
                .bind(role_name)
                .fetch_optional(self.pool())
                .await
                .map_err(DatabaseError::from)?;
        match id {
            Some(id) => Ok(self.load_role(&id).await?),
            None => Ok(None),
        }
    }

    async fn save(&self, role: Role) -> authz::Result<Role> {
        Ok(self.save_role(role).await?)
    }

    async fn search(&self, filter: &RoleFilter) -> authz::Result<Vec<Role>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM roles \
             WHERE (?1 IS NULL OR realm = ?1) AND (?2 IS NULL OR role_name = ?2) \
             ORDER BY rowid",
        )
        .bind(filter.realm.as_deref())
        .bind(filter.role_name.as_deref())
        .fetch_all(self.pool())
        .await
        .map_err(DatabaseError::from)?;

        let mut roles = Vec::with_capacity(ids.len());
        for id in ids {
            roles.extend(self.load_role(&id).await?);
        }
        Ok(roles)
    }

    async fn remove_by_id(&self, id: &str) -> authz::Result<()> {
        Ok(self.remove("roles", "Role", id).await?)
    }

    async fn close(&self) -> authz::Result<()> {
        self.db.close().await;
        Ok(())
    }
}

#[async_trait]
impl PrincipalRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> authz::Result<Option<Principal>> {
        let row = sqlx::query(
            "SELECT id, realm, principal_name, properties FROM principals WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(DatabaseError::from)?;
        match row {
            Some(row) => Ok(Some(self.load_principal(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_name(
        &self,
        realm: &str,
        principal_name: &str,
    ) -> authz::Result<Option<Principal>> {
        let row = sqlx::query(
            "SELECT id, realm, principal_name, properties FROM principals \
             WHERE realm = ? AND principal_name = ?",
        )
        .bind(realm)
        .bind(principal_name)
        .fetch_optional(self.pool())
        .await
        .map_err(DatabaseError::from)?;
        match row {
            Some(row) => Ok(Some(self.load_principal(&row).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, principal: Principal) -> authz::Result<Principal> {
        Ok(self.save_principal(principal).await?)
    }

    async fn search(&self, filter: &PrincipalFilter) -> authz::Result<Vec<Principal>> {
        let rows = sqlx::query(
            "SELECT p.id, p.realm, p.principal_name, p.properties FROM principals p \
             WHERE (?1 IS NULL OR p.realm = ?1) AND (?2 IS NULL OR p.principal_name = ?2) \
             AND (?3 IS NULL OR EXISTS ( \
                 SELECT 1 FROM principal_roles pr JOIN roles r ON r.id = pr.role_id \
                 WHERE pr.principal_id = p.id AND r.role_name = ?3)) \
             ORDER BY p.rowid",
        )
        .bind(filter.realm.as_deref())
        .bind(filter.principal_name.as_deref())
        .bind(filter.role_name.as_deref())
        .fetch_all(self.pool())
        .await
        .map_err(DatabaseError::from)?;

        let mut principals = Vec::with_capacity(rows.len());
        for row in &rows {
            principals.push(self.load_principal(row).await?);
        }
        Ok(principals)
    }

    async fn remove_by_id(&self, id: &str) -> authz::Result<()> {
        Ok(self.remove("principals", "Principal", id).await?)
    }

    async fn increment(
        &self,
        principal: &Principal,
        limit_type: &str,
        resource: &str,
    ) -> authz::Result<Limit> {
        Ok(self.increment_limit(principal, limit_type, resource).await?)
    }

    async fn close(&self) -> authz::Result<()> {
        self.db.close().await;
        Ok(())
    }
}
