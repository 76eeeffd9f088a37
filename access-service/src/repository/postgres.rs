//! PostgreSQL store.
//!
//! Uses sqlx with runtime-checked queries. Multi-step operations run inside a
//! transaction.

use service_core::axum::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    IdentityRepository, IdentityRoleRepository, InvitationRepository, PrivilegeCacheRepository,
    ResourceRepository, ResourceTypeRepository, RoleRepository, Store, TokenRepository,
};
use crate::models::{
    Identity, IdentityRole, Invitation, PrivilegeCacheEntry, Resource, ResourceType, Role,
    Token, TokenPrivilege, TokenStatus,
};

/// PostgreSQL-backed implementation of [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

/// Row carrying invalidations that cover every identity.
const ALL_IDENTITIES: Uuid = Uuid::nil();

/// Advance an identity's invalidation epoch. The upsert holds the epoch row
/// until commit, so fills that locked it first finish before the caller marks
/// entries stale, and fills that come later see the new epoch.
async fn advance_epoch(conn: &mut PgConnection, identity_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO privilege_invalidations (identity_id, epoch) VALUES ($1, 1)
        ON CONFLICT (identity_id) DO UPDATE SET epoch = privilege_invalidations.epoch + 1
        "#,
    )
    .bind(identity_id)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Map insert failures, surfacing unique-key violations as `Conflict`.
fn insert_err(entity: &str, id: impl std::fmt::Display) -> impl FnOnce(sqlx::Error) -> AppError {
    let message = format!("{} with ID {} already exists", entity, id);
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!(message))
        }
        _ => {
            tracing::error!(error = %e, "Insert failed");
            db_err(e)
        }
    }
}

#[async_trait]
impl IdentityRepository for PgStore {
    async fn create_identity(&self, identity: &Identity) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO identities (identity_id, kind_code, username, email, resource_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(identity.identity_id)
        .bind(&identity.kind_code)
        .bind(&identity.username)
        .bind(&identity.email)
        .bind(identity.resource_id)
        .bind(identity.created_utc)
        .execute(&self.pool)
        .await
        .map_err(insert_err("identity", identity.identity_id))?;
        Ok(())
    }

    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, AppError> {
        sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE identity_id = $1")
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, AppError> {
        sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE LOWER(email) = LOWER($1) ORDER BY created_utc LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_identity_by_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<Identity>, AppError> {
        sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl ResourceTypeRepository for PgStore {
    async fn create_resource_type(&self, resource_type: &ResourceType) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO resource_types
                (resource_type_id, name, scopes, default_member_scopes, allows_membership,
                 propagates, invite_scope, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(resource_type.resource_type_id)
        .bind(&resource_type.name)
        .bind(&resource_type.scopes)
        .bind(&resource_type.default_member_scopes)
        .bind(resource_type.allows_membership)
        .bind(resource_type.propagates)
        .bind(&resource_type.invite_scope)
        .bind(resource_type.created_utc)
        .execute(&self.pool)
        .await
        .map_err(insert_err("resource type", &resource_type.name))?;
        Ok(())
    }

    async fn find_resource_type(
        &self,
        resource_type_id: Uuid,
    ) -> Result<Option<ResourceType>, AppError> {
        sqlx::query_as::<_, ResourceType>(
            "SELECT * FROM resource_types WHERE resource_type_id = $1",
        )
        .bind(resource_type_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_resource_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ResourceType>, AppError> {
        sqlx::query_as::<_, ResourceType>("SELECT * FROM resource_types WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn add_resource_type_scope(
        &self,
        resource_type_id: Uuid,
        scope: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE resource_types
            SET scopes = CASE WHEN $2 = ANY(scopes) THEN scopes ELSE array_append(scopes, $2) END
            WHERE resource_type_id = $1
            "#,
        )
        .bind(resource_type_id)
        .bind(scope)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "resource type {} not found",
                resource_type_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceRepository for PgStore {
    async fn create_resource(&self, resource: &Resource) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO resources (resource_id, resource_type_id, parent_resource_id, owner_id, name, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(resource.resource_id)
        .bind(resource.resource_type_id)
        .bind(resource.parent_resource_id)
        .bind(resource.owner_id)
        .bind(&resource.name)
        .bind(resource.created_utc)
        .execute(&self.pool)
        .await
        .map_err(insert_err("resource", resource.resource_id))?;
        Ok(())
    }

    async fn find_resource(&self, resource_id: Uuid) -> Result<Option<Resource>, AppError> {
        sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_subtree_ids(&self, resource_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH RECURSIVE subtree (resource_id, depth_val) AS (
                SELECT $1::uuid, 0
                UNION
                SELECT r.resource_id, s.depth_val + 1
                FROM resources r
                JOIN subtree s ON r.parent_resource_id = s.resource_id
            )
            SELECT resource_id FROM subtree ORDER BY depth_val
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn create_role(&self, role: &Role) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, resource_type_id, name, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(role.role_id)
        .bind(role.resource_type_id)
        .bind(&role.name)
        .bind(role.created_utc)
        .execute(&self.pool)
        .await
        .map_err(insert_err("role", &role.name))?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_role_by_name(
        &self,
        resource_type_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE resource_type_id = $1 AND name = $2")
            .bind(resource_type_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn add_role_scope(&self, role_id: Uuid, scope: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO role_scopes (role_id, scope)
            VALUES ($1, $2)
            ON CONFLICT (role_id, scope) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(scope)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("role {} not found", role_id))
            }
            _ => db_err(e),
        })?;
        Ok(())
    }

    async fn list_role_scopes(&self, role_id: Uuid) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            "SELECT scope FROM role_scopes WHERE role_id = $1 ORDER BY scope",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

const INSERT_IDENTITY_ROLE: &str = r#"
    INSERT INTO identity_roles (identity_role_id, identity_id, resource_id, role_id, created_utc)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT DO NOTHING
"#;

#[async_trait]
impl IdentityRoleRepository for PgStore {
    async fn create_identity_role(&self, assignment: &IdentityRole) -> Result<bool, AppError> {
        let result = sqlx::query(INSERT_IDENTITY_ROLE)
            .bind(assignment.identity_role_id)
            .bind(assignment.identity_id)
            .bind(assignment.resource_id)
            .bind(assignment.role_id)
            .bind(assignment.created_utc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_identity_role(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM identity_roles
            WHERE identity_id = $1 AND resource_id = $2 AND role_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(identity_id)
        .bind(resource_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_identity_roles(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError> {
        sqlx::query_as::<_, IdentityRole>(
            "SELECT * FROM identity_roles WHERE identity_id = $1 AND resource_id = $2",
        )
        .bind(identity_id)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_identity_roles_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError> {
        sqlx::query_as::<_, IdentityRole>(
            "SELECT * FROM identity_roles WHERE resource_id = $1 ORDER BY created_utc",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl PrivilegeCacheRepository for PgStore {
    async fn find_current_privileges(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        sqlx::query_as::<_, PrivilegeCacheEntry>(
            r#"
            SELECT * FROM privilege_cache
            WHERE identity_id = $1 AND resource_id = $2 AND NOT stale
            ORDER BY generation DESC
            LIMIT 1
            "#,
        )
        .bind(identity_id)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_privilege_entry(
        &self,
        privilege_cache_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        sqlx::query_as::<_, PrivilegeCacheEntry>(
            "SELECT * FROM privilege_cache WHERE privilege_cache_id = $1",
        )
        .bind(privilege_cache_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn invalidation_epoch(&self, identity_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(epoch), 0)::BIGINT FROM privilege_invalidations
            WHERE identity_id = $1 OR identity_id = $2
            "#,
        )
        .bind(identity_id)
        .bind(ALL_IDENTITIES)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_privileges(
        &self,
        entry: PrivilegeCacheEntry,
        epoch: i64,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO privilege_invalidations (identity_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(entry.identity_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Share-lock the epoch rows: a concurrent invalidation either commits
        // first and moves the epoch, or waits and then marks this entry stale.
        let current: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(epoch), 0)::BIGINT FROM (
                SELECT epoch FROM privilege_invalidations
                WHERE identity_id = $1 OR identity_id = $2
                FOR SHARE
            ) locked
            "#,
        )
        .bind(entry.identity_id)
        .bind(ALL_IDENTITIES)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if current != epoch {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE privilege_cache SET stale = TRUE
            WHERE identity_id = $1 AND resource_id = $2 AND NOT stale
            "#,
        )
        .bind(entry.identity_id)
        .bind(entry.resource_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let stored = sqlx::query_as::<_, PrivilegeCacheEntry>(
            r#"
            INSERT INTO privilege_cache
                (privilege_cache_id, identity_id, resource_id, scopes, generation, stale, created_utc)
            VALUES ($1, $2, $3, $4, nextval('privilege_cache_generation_seq'), FALSE, $5)
            RETURNING *
            "#,
        )
        .bind(entry.privilege_cache_id)
        .bind(entry.identity_id)
        .bind(entry.resource_id)
        .bind(&entry.scopes)
        .bind(entry.created_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(insert_err("privilege cache entry", entry.privilege_cache_id))?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(stored))
    }

    async fn delete_unreferenced_stale_privileges(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM privilege_cache pc
            WHERE pc.stale AND NOT EXISTS (
                SELECT 1 FROM token_privileges tp
                WHERE tp.privilege_cache_id = pc.privilege_cache_id
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_privileges_stale(
        &self,
        identity_id: Uuid,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        advance_epoch(&mut tx, identity_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE privilege_cache SET stale = TRUE
            WHERE identity_id = $1 AND resource_id = ANY($2) AND NOT stale
            "#,
        )
        .bind(identity_id)
        .bind(resource_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_privileges_stale_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        advance_epoch(&mut tx, identity_id).await?;
        let result = sqlx::query(
            "UPDATE privilege_cache SET stale = TRUE WHERE identity_id = $1 AND NOT stale",
        )
        .bind(identity_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_privileges_stale_for_resources(
        &self,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        advance_epoch(&mut tx, ALL_IDENTITIES).await?;
        let result = sqlx::query(
            "UPDATE privilege_cache SET stale = TRUE WHERE resource_id = ANY($1) AND NOT stale",
        )
        .bind(resource_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InvitationRepository for PgStore {
    async fn create_invitations(&self, invitations: &[Invitation]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for invitation in invitations {
            sqlx::query(
                r#"
                INSERT INTO invitations
                    (invitation_id, identity_id, resource_id, member, role_ids, accept_code_hash,
                     redirect_on_success, redirect_on_failure, issuer_id, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(invitation.invitation_id)
            .bind(invitation.identity_id)
            .bind(invitation.resource_id)
            .bind(invitation.member)
            .bind(&invitation.role_ids)
            .bind(&invitation.accept_code_hash)
            .bind(&invitation.redirect_on_success)
            .bind(&invitation.redirect_on_failure)
            .bind(invitation.issuer_id)
            .bind(invitation.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(insert_err("invitation", invitation.invitation_id))?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, AppError> {
        sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE invitation_id = $1")
            .bind(invitation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_invitation_by_code_hash(
        &self,
        accept_code_hash: &str,
    ) -> Result<Option<Invitation>, AppError> {
        sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE accept_code_hash = $1")
            .bind(accept_code_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_invitations_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE resource_id = $1 ORDER BY created_utc",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_invitations_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE identity_id = $1 ORDER BY created_utc",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn delete_invitation(&self, invitation_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM invitations WHERE invitation_id = $1")
            .bind(invitation_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "invitation {} not found",
                invitation_id
            )));
        }
        Ok(())
    }

    async fn consume_invitation(
        &self,
        accept_code_hash: &str,
        subtree: &[Uuid],
    ) -> Result<Invitation, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Whoever deletes the row owns the grant; concurrent callers see no row.
        let invitation = sqlx::query_as::<_, Invitation>(
            "DELETE FROM invitations WHERE accept_code_hash = $1 RETURNING *",
        )
        .bind(accept_code_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invitation not found")))?;

        let mut assignments = Vec::with_capacity(invitation.role_ids.len() + 1);
        if invitation.member {
            assignments.push(IdentityRole::member(
                invitation.identity_id,
                invitation.resource_id,
            ));
        }
        for role_id in &invitation.role_ids {
            assignments.push(IdentityRole::role(
                invitation.identity_id,
                invitation.resource_id,
                *role_id,
            ));
        }
        for assignment in &assignments {
            sqlx::query(INSERT_IDENTITY_ROLE)
                .bind(assignment.identity_role_id)
                .bind(assignment.identity_id)
                .bind(assignment.resource_id)
                .bind(assignment.role_id)
                .bind(assignment.created_utc)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        advance_epoch(&mut tx, invitation.identity_id).await?;
        sqlx::query(
            r#"
            UPDATE privilege_cache SET stale = TRUE
            WHERE identity_id = $1 AND resource_id = ANY($2) AND NOT stale
            "#,
        )
        .bind(invitation.identity_id)
        .bind(subtree)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(invitation)
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn check_token_exists(&self, token_id: Uuid) -> Result<(), AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tokens WHERE token_id = $1)")
                .bind(token_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "unable to verify if token exists: {}",
                        e
                    ))
                })?;
        if !exists {
            return Err(AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)));
        }
        Ok(())
    }

    async fn load_token(&self, token_id: Uuid) -> Result<Token, AppError> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)))
    }

    async fn create_token(&self, token: &Token) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, identity_id, token_type, status, expiry_time, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.identity_id)
        .bind(&token.token_type)
        .bind(token.status)
        .bind(token.expiry_time)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await
        .map_err(insert_err("token", token.token_id))?;

        tracing::debug!(token_id = %token.token_id, "Token created");
        Ok(())
    }

    async fn save_token(&self, token: &Token) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens SET identity_id = $2, token_type = $3, expiry_time = $4
            WHERE token_id = $1
            "#,
        )
        .bind(token.token_id)
        .bind(token.identity_id)
        .bind(&token.token_type)
        .bind(token.expiry_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "token {} not found",
                token.token_id
            )));
        }
        Ok(())
    }

    async fn set_token_status_flags(
        &self,
        token_id: Uuid,
        status: TokenStatus,
        unless: TokenStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE tokens SET status = status | $2 WHERE token_id = $1 AND status & $3 = 0",
        )
        .bind(token_id)
        .bind(status.bits())
        .bind(unless.bits())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            self.check_token_exists(token_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete_token(&self, token_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)));
        }
        Ok(())
    }

    async fn list_tokens_for_identity(&self, identity_id: Uuid) -> Result<Vec<Token>, AppError> {
        sqlx::query_as::<_, Token>(
            "SELECT * FROM tokens WHERE identity_id = $1 ORDER BY created_utc",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn create_token_privilege(&self, privilege: &TokenPrivilege) -> Result<(), AppError> {
        sqlx::query("INSERT INTO token_privileges (token_id, privilege_cache_id) VALUES ($1, $2)")
            .bind(privilege.token_id)
            .bind(privilege.privilege_cache_id)
            .execute(&self.pool)
            .await
            .map_err(insert_err("token privilege", privilege.token_id))?;
        Ok(())
    }

    async fn list_token_privileges(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<PrivilegeCacheEntry>, AppError> {
        sqlx::query_as::<_, PrivilegeCacheEntry>(
            r#"
            SELECT pc.* FROM privilege_cache pc
            JOIN token_privileges tp ON tp.privilege_cache_id = pc.privilege_cache_id
            WHERE tp.token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn set_status_flags_for_identity(
        &self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE tokens SET status = status | $2 WHERE identity_id = $1")
            .bind(identity_id)
            .bind(status.bits())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired_tokens(&self, retention_hours: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM tokens WHERE expiry_time < NOW() - make_interval(hours => $1)",
        )
        .bind(retention_hours as i32)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}
