//! Postgres-backed implementation of the RBAC store.
//!
//! # What this module is
//! Implements `RbacStore` and `KeyStore` on top of Postgres (via `sqlx`). It is
//! the durable backing store for the workspace-scoped key/role/permission graph.
//!
//! # Key invariants
//! - Every query filters by `workspace_id`; primary keys are `(workspace_id, id)`.
//! - Each mutating method runs in one transaction. Returning early with `?`
//!   drops the transaction, which rolls it back.
//! - The schema has no foreign keys. Deletes remove junction rows first and
//!   their endpoints last, inside the same transaction.
//! - Every change to a key's links bumps its row in `key_authz_versions`.
//!
//! # Concurrency model
//! - `sqlx::PgPool` hands out connections; pool sizing controls throughput.
//! - Concurrent get-or-create of one permission name converges through the
//!   `(workspace_id, name)` unique constraint and `ON CONFLICT DO NOTHING`.
//! - Full replace locks the key's version row `FOR UPDATE`, so two replaces of
//!   the same key serialize and the optimistic check sees committed state.
//! - Linking writes take `FOR KEY SHARE` on every endpoint they reference;
//!   cascade deletes take `FOR UPDATE`. A delete therefore waits for in-flight
//!   links and removes them, or a link waits and then sees the endpoint gone.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - All SQL is static; ids are always bound, never interpolated.
use super::{
    KeyRbacReplace, KeyStore, RbacStore, RoleGrant, RolePatch, StoreError, StoreResult,
    UpsertedPermission,
};
use crate::config::PostgresConfig;
use crate::model::{Key, Permission, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::time::Duration;

/// Durable RBAC store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use keygate_controlplane::config::PostgresConfig;
/// use keygate_controlplane::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `permissions` table.
///
/// DB-facing rows stay separate from the API model so schema details do not
/// leak into serialized responses.
#[derive(Debug, Clone, FromRow)]
struct DbPermission {
    workspace_id: String,
    id: String,
    name: String,
    slug: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    workspace_id: String,
    id: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A `roles_permissions` row joined with its permission.
#[derive(Debug, Clone, FromRow)]
struct DbRoleGrant {
    role_id: String,
    #[sqlx(flatten)]
    permission: DbPermission,
}

#[derive(Debug, Clone, FromRow)]
struct DbKey {
    workspace_id: String,
    id: String,
    name: Option<String>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<DbPermission> for Permission {
    fn from(row: DbPermission) -> Self {
        Permission {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<DbRole> for Role {
    fn from(row: DbRole) -> Self {
        Role {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<DbKey> for Key {
    fn from(row: DbKey) -> Self {
        Key {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

const PERMISSION_COLUMNS: &str =
    "p.workspace_id, p.id, p.name, p.slug, p.description, p.created_at, p.updated_at";

// Held until the linking transaction commits. Lock order matches `delete_roles`.
const EXISTING_ROLE_IDS: &str = "SELECT id FROM roles WHERE workspace_id = $1 AND id = ANY($2) \
     ORDER BY id FOR KEY SHARE";
const EXISTING_PERMISSION_IDS: &str = "SELECT id FROM permissions \
     WHERE workspace_id = $1 AND id = ANY($2) ORDER BY id FOR KEY SHARE";

impl PostgresStore {
    /// Connect, size the pool from `pg`, and apply embedded migrations.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations, for tests that manage the schema.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Bounded by connect_timeout_ms; the pool itself retries until acquire_timeout_ms.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), pool)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow::anyhow!("postgres connect timed out")))??;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Exposed for integration tests that seed the external `keys` table.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn classify_write(err: sqlx::Error, conflict: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(conflict.to_string())
    } else {
        StoreError::Unexpected(err.into())
    }
}

async fn existing_ids(
    conn: &mut PgConnection,
    sql: &'static str,
    workspace_id: &str,
    ids: &[String],
) -> StoreResult<HashSet<String>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let rows: Vec<String> = sqlx::query_scalar(sql)
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().collect())
}

fn missing_from(ids: &[String], found: &HashSet<String>) -> Vec<String> {
    let missing: BTreeSet<&String> = ids.iter().filter(|id| !found.contains(*id)).collect();
    missing.into_iter().cloned().collect()
}

/// Fail with `Invalid` naming any id that does not resolve in the workspace.
async fn require_ids(
    conn: &mut PgConnection,
    sql: &'static str,
    what: &str,
    workspace_id: &str,
    ids: &[String],
) -> StoreResult<()> {
    let found = existing_ids(conn, sql, workspace_id, ids).await?;
    let missing = missing_from(ids, &found);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!(
            "{what} not found: {}",
            missing.join(", ")
        )))
    }
}

async fn row_exists(
    conn: &mut PgConnection,
    sql: &'static str,
    workspace_id: &str,
    id: &str,
) -> StoreResult<bool> {
    let found: Option<String> = sqlx::query_scalar(sql)
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

const ROLE_EXISTS: &str =
    "SELECT id FROM roles WHERE workspace_id = $1 AND id = $2 FOR KEY SHARE";
const PERMISSION_EXISTS: &str =
    "SELECT id FROM permissions WHERE workspace_id = $1 AND id = $2 FOR KEY SHARE";

async fn bump_version(conn: &mut PgConnection, workspace_id: &str, key_id: &str) -> StoreResult<u64> {
    let version: i64 = sqlx::query_scalar(
        r#"INSERT INTO key_authz_versions (workspace_id, key_id, version, updated_at)
           VALUES ($1, $2, 1, now())
           ON CONFLICT (workspace_id, key_id)
           DO UPDATE SET version = key_authz_versions.version + 1, updated_at = now()
           RETURNING version"#,
    )
    .bind(workspace_id)
    .bind(key_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(version as u64)
}

#[async_trait]
impl RbacStore for PostgresStore {
    async fn list_permissions(&self, workspace_id: &str) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.workspace_id = $1 ORDER BY p.name"
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn get_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission> {
        let row = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.workspace_id = $1 AND p.id = $2"
        ))
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Permission::from)
            .ok_or_else(|| StoreError::NotFound("permission".into()))
    }

    async fn find_permissions(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> StoreResult<Vec<Permission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p \
             WHERE p.workspace_id = $1 AND p.id = ANY($2) ORDER BY p.id"
        ))
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        sqlx::query(
            r#"INSERT INTO permissions
               (workspace_id, id, name, slug, description, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&permission.workspace_id)
        .bind(&permission.id)
        .bind(&permission.name)
        .bind(&permission.slug)
        .bind(&permission.description)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| classify_write(err, "permission exists"))?;
        Ok(permission)
    }

    async fn upsert_permissions(
        &self,
        workspace_id: &str,
        names: &[String],
    ) -> StoreResult<Vec<UpsertedPermission>> {
        let mut tx = self.pool.begin().await?;
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let candidate = Permission::new(workspace_id, name, None);
            let inserted = sqlx::query_as::<_, DbPermission>(
                r#"INSERT INTO permissions
                   (workspace_id, id, name, slug, description, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, NULL, $5, $5)
                   ON CONFLICT (workspace_id, name) DO NOTHING
                   RETURNING workspace_id, id, name, slug, description, created_at, updated_at"#,
            )
            .bind(workspace_id)
            .bind(&candidate.id)
            .bind(&candidate.name)
            .bind(&candidate.slug)
            .bind(candidate.created_at)
            .fetch_optional(&mut *tx)
            .await?;
            let upserted = match inserted {
                Some(row) => UpsertedPermission {
                    permission: row.into(),
                    created: true,
                },
                None => {
                    let row = sqlx::query_as::<_, DbPermission>(&format!(
                        "SELECT {PERMISSION_COLUMNS} FROM permissions p \
                         WHERE p.workspace_id = $1 AND p.name = $2"
                    ))
                    .bind(workspace_id)
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await?;
                    UpsertedPermission {
                        permission: row.into(),
                        created: false,
                    }
                }
            };
            out.push(upserted);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn update_permission(
        &self,
        workspace_id: &str,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE permissions
               SET name = $3, slug = $3, description = $4, updated_at = now()
               WHERE workspace_id = $1 AND id = $2"#,
        )
        .bind(workspace_id)
        .bind(id)
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|err| classify_write(err, "permission exists"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("permission".into()));
        }
        Ok(())
    }

    async fn delete_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p \
             WHERE p.workspace_id = $1 AND p.id = $2 FOR UPDATE"
        ))
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("permission".into()))?;

        sqlx::query("DELETE FROM roles_permissions WHERE workspace_id = $1 AND permission_id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let key_ids: Vec<String> = sqlx::query_scalar(
            "DELETE FROM keys_permissions WHERE workspace_id = $1 AND permission_id = $2 RETURNING key_id",
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM permissions WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for key_id in key_ids.iter().collect::<BTreeSet<_>>() {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(existing.into())
    }

    async fn list_roles(&self, workspace_id: &str) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            r#"SELECT workspace_id, id, name, description, created_at, updated_at
               FROM roles WHERE workspace_id = $1 ORDER BY name"#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn get_role(&self, workspace_id: &str, id: &str) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, DbRole>(
            r#"SELECT workspace_id, id, name, description, created_at, updated_at
               FROM roles WHERE workspace_id = $1 AND id = $2"#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Role::from)
            .ok_or_else(|| StoreError::NotFound("role".into()))
    }

    async fn find_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbRole>(
            r#"SELECT workspace_id, id, name, description, created_at, updated_at
               FROM roles WHERE workspace_id = $1 AND id = ANY($2) ORDER BY id"#,
        )
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn create_role(&self, role: Role, permission_ids: &[String]) -> StoreResult<Role> {
        let mut tx = self.pool.begin().await?;
        require_ids(
            &mut tx,
            EXISTING_PERMISSION_IDS,
            "permissions",
            &role.workspace_id,
            permission_ids,
        )
        .await?;
        sqlx::query(
            r#"INSERT INTO roles (workspace_id, id, name, description, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&role.workspace_id)
        .bind(&role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| classify_write(err, "role exists"))?;
        if !permission_ids.is_empty() {
            sqlx::query(
                r#"INSERT INTO roles_permissions (workspace_id, role_id, permission_id)
                   SELECT $1, $2, UNNEST($3::text[])
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(&role.workspace_id)
            .bind(&role.id)
            .bind(permission_ids)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(role)
    }

    async fn update_role(
        &self,
        workspace_id: &str,
        id: &str,
        patch: RolePatch,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE roles
               SET name = COALESCE($3, name),
                   description = COALESCE($4, description),
                   updated_at = now()
               WHERE workspace_id = $1 AND id = $2"#,
        )
        .bind(workspace_id)
        .bind(id)
        .bind(patch.name)
        .bind(patch.description)
        .execute(&self.pool)
        .await
        .map_err(|err| classify_write(err, "role exists"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role".into()));
        }
        Ok(())
    }

    async fn delete_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>> {
        let unique: Vec<String> = ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut tx = self.pool.begin().await?;
        let found = sqlx::query_as::<_, DbRole>(
            r#"SELECT workspace_id, id, name, description, created_at, updated_at
               FROM roles WHERE workspace_id = $1 AND id = ANY($2)
               ORDER BY id FOR UPDATE"#,
        )
        .bind(workspace_id)
        .bind(&unique)
        .fetch_all(&mut *tx)
        .await?;
        if found.len() != unique.len() {
            let present: HashSet<String> = found.iter().map(|row| row.id.clone()).collect();
            return Err(StoreError::NotFound(format!(
                "roles not found: {}",
                missing_from(&unique, &present).join(", ")
            )));
        }

        sqlx::query("DELETE FROM roles_permissions WHERE workspace_id = $1 AND role_id = ANY($2)")
            .bind(workspace_id)
            .bind(&unique)
            .execute(&mut *tx)
            .await?;
        let key_ids: Vec<String> = sqlx::query_scalar(
            "DELETE FROM keys_roles WHERE workspace_id = $1 AND role_id = ANY($2) RETURNING key_id",
        )
        .bind(workspace_id)
        .bind(&unique)
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM roles WHERE workspace_id = $1 AND id = ANY($2)")
            .bind(workspace_id)
            .bind(&unique)
            .execute(&mut *tx)
            .await?;
        for key_id in key_ids.iter().collect::<BTreeSet<_>>() {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(found.into_iter().map(Role::from).collect())
    }

    async fn connect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !row_exists(&mut tx, ROLE_EXISTS, workspace_id, role_id).await? {
            return Err(StoreError::NotFound("role".into()));
        }
        if !row_exists(&mut tx, PERMISSION_EXISTS, workspace_id, permission_id).await? {
            return Err(StoreError::NotFound("permission".into()));
        }
        let result = sqlx::query(
            r#"INSERT INTO roles_permissions (workspace_id, role_id, permission_id)
               VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn disconnect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"DELETE FROM roles_permissions
               WHERE workspace_id = $1 AND role_id = $2 AND permission_id = $3"#,
        )
        .bind(workspace_id)
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_grants(
        &self,
        workspace_id: &str,
        role_ids: &[String],
    ) -> StoreResult<Vec<RoleGrant>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbRoleGrant>(&format!(
            "SELECT rp.role_id, {PERMISSION_COLUMNS} \
             FROM roles_permissions rp \
             JOIN permissions p ON p.workspace_id = rp.workspace_id AND p.id = rp.permission_id \
             WHERE rp.workspace_id = $1 AND rp.role_id = ANY($2) \
             ORDER BY rp.role_id, p.name"
        ))
        .bind(workspace_id)
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RoleGrant {
                role_id: row.role_id,
                permission: row.permission.into(),
            })
            .collect())
    }

    async fn role_key_ids(&self, workspace_id: &str, role_id: &str) -> StoreResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"SELECT key_id FROM keys_roles
               WHERE workspace_id = $1 AND role_id = $2 ORDER BY key_id"#,
        )
        .bind(workspace_id)
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn key_roles(&self, workspace_id: &str, key_id: &str) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            r#"SELECT r.workspace_id, r.id, r.name, r.description, r.created_at, r.updated_at
               FROM keys_roles kr
               JOIN roles r ON r.workspace_id = kr.workspace_id AND r.id = kr.role_id
               WHERE kr.workspace_id = $1 AND kr.key_id = $2
               ORDER BY r.name"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn key_permissions(
        &self,
        workspace_id: &str,
        key_id: &str,
    ) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} \
             FROM keys_permissions kp \
             JOIN permissions p ON p.workspace_id = kp.workspace_id AND p.id = kp.permission_id \
             WHERE kp.workspace_id = $1 AND kp.key_id = $2 \
             ORDER BY p.name"
        ))
        .bind(workspace_id)
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn connect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !row_exists(&mut tx, ROLE_EXISTS, workspace_id, role_id).await? {
            return Err(StoreError::NotFound("role".into()));
        }
        let result = sqlx::query(
            r#"INSERT INTO keys_roles (workspace_id, key_id, role_id)
               VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        let created = result.rows_affected() == 1;
        if created {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn disconnect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM keys_roles WHERE workspace_id = $1 AND key_id = $2 AND role_id = $3",
        )
        .bind(workspace_id)
        .bind(key_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn connect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !row_exists(&mut tx, PERMISSION_EXISTS, workspace_id, permission_id).await? {
            return Err(StoreError::NotFound("permission".into()));
        }
        let result = sqlx::query(
            r#"INSERT INTO keys_permissions (workspace_id, key_id, permission_id)
               VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;
        let created = result.rows_affected() == 1;
        if created {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn disconnect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"DELETE FROM keys_permissions
               WHERE workspace_id = $1 AND key_id = $2 AND permission_id = $3"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            bump_version(&mut tx, workspace_id, key_id).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn replace_key_rbac(
        &self,
        workspace_id: &str,
        replace: &KeyRbacReplace,
    ) -> StoreResult<u64> {
        let key_id = replace.key_id.as_str();
        let mut tx = self.pool.begin().await?;

        // Materialize the version row so there is always something to lock.
        sqlx::query(
            r#"INSERT INTO key_authz_versions (workspace_id, key_id, version)
               VALUES ($1, $2, 0) ON CONFLICT DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .execute(&mut *tx)
        .await?;
        let current: i64 = sqlx::query_scalar(
            r#"SELECT version FROM key_authz_versions
               WHERE workspace_id = $1 AND key_id = $2 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .fetch_one(&mut *tx)
        .await?;
        if let Some(expected) = replace.expected_version {
            if current as u64 != expected {
                return Err(StoreError::Conflict(format!(
                    "key authorization version is {current}, expected {expected}"
                )));
            }
        }

        require_ids(
            &mut tx,
            EXISTING_ROLE_IDS,
            "roles",
            workspace_id,
            &replace.role_ids,
        )
        .await?;
        require_ids(
            &mut tx,
            EXISTING_PERMISSION_IDS,
            "permissions",
            workspace_id,
            &replace.permission_ids,
        )
        .await?;

        sqlx::query("DELETE FROM keys_roles WHERE workspace_id = $1 AND key_id = $2")
            .bind(workspace_id)
            .bind(key_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM keys_permissions WHERE workspace_id = $1 AND key_id = $2")
            .bind(workspace_id)
            .bind(key_id)
            .execute(&mut *tx)
            .await?;
        if !replace.role_ids.is_empty() {
            sqlx::query(
                r#"INSERT INTO keys_roles (workspace_id, key_id, role_id)
                   SELECT $1, $2, UNNEST($3::text[])
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(workspace_id)
            .bind(key_id)
            .bind(&replace.role_ids)
            .execute(&mut *tx)
            .await?;
        }
        if !replace.permission_ids.is_empty() {
            sqlx::query(
                r#"INSERT INTO keys_permissions (workspace_id, key_id, permission_id)
                   SELECT $1, $2, UNNEST($3::text[])
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(workspace_id)
            .bind(key_id)
            .bind(&replace.permission_ids)
            .execute(&mut *tx)
            .await?;
        }
        let version = bump_version(&mut tx, workspace_id, key_id).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn key_authz_version(&self, workspace_id: &str, key_id: &str) -> StoreResult<u64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM key_authz_versions WHERE workspace_id = $1 AND key_id = $2",
        )
        .bind(workspace_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.unwrap_or(0) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl KeyStore for PostgresStore {
    async fn get_key(&self, workspace_id: &str, key_id: &str) -> StoreResult<Option<Key>> {
        let row = sqlx::query_as::<_, DbKey>(
            r#"SELECT workspace_id, id, name, updated_at, deleted_at
               FROM keys WHERE workspace_id = $1 AND id = $2"#,
        )
        .bind(workspace_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Key::from))
    }

    async fn find_keys(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Key>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbKey>(
            r#"SELECT workspace_id, id, name, updated_at, deleted_at
               FROM keys WHERE workspace_id = $1 AND id = ANY($2) ORDER BY id"#,
        )
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Key::from).collect())
    }
}
