//! Authorization service (C7): API key management and authentication.
//!
//! Capability and project-scope enforcement itself lives on
//! [`Principal::require`]; every engine calls it before touching state. This
//! service owns the key store: creation, revocation, listing, and resolving
//! a presented secret to a principal.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{auth_repository, event_repository, project_repository};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    hash_secret, ApiKey, ApiKeyStatus, Capability, EventDraft, EventEntity, EventType, Principal,
    RoleScope,
};
use crate::domain::ports::Clock;

use super::event_log::EventLog;

/// Pass when the principal holds any one of `capabilities` for the target
/// project. Used by operations several roles may perform.
pub(crate) fn require_any(
    principal: &Principal,
    capabilities: &[Capability],
    target_project: Option<Uuid>,
) -> CoreResult<()> {
    let mut last = None;
    for capability in capabilities {
        match principal.require(*capability, target_project) {
            Ok(()) => return Ok(()),
            // Scope violations are not softened by trying another capability.
            Err(e @ CoreError::ProjectScopeViolation { .. }) => return Err(e),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or(CoreError::Unauthenticated))
}

/// A freshly created key: the secret is returned exactly once.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key: ApiKey,
    pub secret: String,
}

pub struct AuthService {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(pool: SqlitePool, events: EventLog, clock: Arc<dyn Clock>) -> Self {
        Self { pool, events, clock }
    }

    pub async fn create_api_key(
        &self,
        principal: &Principal,
        project_id: Uuid,
        name: &str,
        role_scopes: Vec<RoleScope>,
    ) -> CoreResult<IssuedKey> {
        principal.require(Capability::KeyAdmin, Some(project_id))?;
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("key name cannot be empty".into()));
        }
        if role_scopes.is_empty() {
            return Err(CoreError::InvalidArgument("key needs at least one role scope".into()));
        }
        let now = self.clock.now();
        let secret = format!(
            "tsk_{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let key = ApiKey {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            key_hash: hash_secret(&secret),
            role_scopes,
            status: ApiKeyStatus::Active,
            created_at: now,
            revoked_at: None,
        };

        let mut tx = self.pool.begin().await?;
        project_repository::get(&mut tx, project_id).await?;
        auth_repository::insert(&mut tx, &key).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project_id,
                EventEntity::ApiKey,
                key.id,
                EventType::ApiKeyCreated,
                json!({
                    "name": key.name,
                    "role_scopes": key.role_scopes,
                    "actor_id": principal.actor_id,
                }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(IssuedKey { key, secret })
    }

    pub async fn revoke_api_key(&self, principal: &Principal, key_id: Uuid) -> CoreResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        // Resolve the key to its project before scope enforcement.
        let key = auth_repository::fetch(&mut tx, key_id)
            .await?
            .ok_or_else(|| CoreError::InvalidArgument(format!("api key {key_id} not found")))?;
        principal.require(Capability::KeyAdmin, Some(key.project_id))?;

        auth_repository::revoke(&mut tx, key_id, &now.to_rfc3339()).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                key.project_id,
                EventEntity::ApiKey,
                key.id,
                EventType::ApiKeyRevoked,
                json!({ "actor_id": principal.actor_id }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(())
    }

    pub async fn list_api_keys(
        &self,
        principal: &Principal,
        project_id: Uuid,
    ) -> CoreResult<Vec<ApiKey>> {
        principal.require(Capability::KeyAdmin, Some(project_id))?;
        let mut conn = self.pool.acquire().await?;
        auth_repository::list_for_project(&mut conn, project_id).await
    }

    /// Resolve a presented secret to a principal. Revoked and unknown keys
    /// are indistinguishable to the caller.
    pub async fn authenticate(&self, secret: &str) -> CoreResult<Principal> {
        let mut conn = self.pool.acquire().await?;
        let key = auth_repository::fetch_by_hash(&mut conn, &hash_secret(secret))
            .await?
            .ok_or(CoreError::Unauthenticated)?;
        if key.status != ApiKeyStatus::Active {
            return Err(CoreError::Unauthenticated);
        }
        Ok(Principal {
            api_key_id: key.id,
            project_id: Some(key.project_id),
            role_scopes: key.role_scopes,
            actor_id: key.name,
        })
    }
}
