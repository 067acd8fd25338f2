//! API key persistence. Only digests are stored.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{ApiKey, ApiKeyStatus, RoleScope};

use super::codec::{parse_datetime, parse_opt_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    project_id: String,
    name: String,
    key_hash: String,
    role_scopes: String,
    status: String,
    created_at: String,
    revoked_at: Option<String>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = CoreError;

    fn try_from(row: ApiKeyRow) -> CoreResult<Self> {
        let scopes: Vec<String> = serde_json::from_str(&row.role_scopes)?;
        let role_scopes = scopes
            .iter()
            .map(|s| {
                RoleScope::from_str(s)
                    .ok_or_else(|| CoreError::Storage(format!("unknown role scope {s:?}")))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(ApiKey {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            name: row.name,
            key_hash: row.key_hash,
            role_scopes,
            status: ApiKeyStatus::from_str(&row.status)
                .ok_or_else(|| CoreError::Storage(format!("unknown key status {:?}", row.status)))?,
            created_at: parse_datetime(&row.created_at)?,
            revoked_at: parse_opt_datetime(row.revoked_at.as_deref())?,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, key: &ApiKey) -> CoreResult<()> {
    let scopes: Vec<&str> = key.role_scopes.iter().map(|r| r.as_str()).collect();
    sqlx::query(
        "INSERT INTO api_keys (id, project_id, name, key_hash, role_scopes, status, created_at, revoked_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(key.id.to_string())
    .bind(key.project_id.to_string())
    .bind(&key.name)
    .bind(&key.key_hash)
    .bind(serde_json::to_string(&scopes)?)
    .bind(key.status.as_str())
    .bind(key.created_at.to_rfc3339())
    .bind(key.revoked_at.map(|t| t.to_rfc3339()))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_by_hash(conn: &mut SqliteConnection, key_hash: &str) -> CoreResult<Option<ApiKey>> {
    let row: Option<ApiKeyRow> = sqlx::query_as("SELECT * FROM api_keys WHERE key_hash = ?")
        .bind(key_hash)
        .fetch_optional(conn)
        .await?;
    row.map(ApiKey::try_from).transpose()
}

pub async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<ApiKey>> {
    let row: Option<ApiKeyRow> = sqlx::query_as("SELECT * FROM api_keys WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(ApiKey::try_from).transpose()
}

pub async fn revoke(conn: &mut SqliteConnection, id: Uuid, revoked_at: &str) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE api_keys SET status = 'revoked', revoked_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(revoked_at)
    .bind(id.to_string())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::InvalidArgument(format!(
            "api key {id} not found or already revoked"
        )));
    }
    Ok(())
}

pub async fn list_for_project(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<ApiKey>> {
    let rows: Vec<ApiKeyRow> =
        sqlx::query_as("SELECT * FROM api_keys WHERE project_id = ? ORDER BY created_at, id")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(ApiKey::try_from).collect()
}
