//! Admin surface: usage analytics and API-key management. Requires an API key
//! with role `admin`; every query stays scoped to the caller's tenant.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::db::tenant::TenantTxn;
use crate::error::{AppError, Result};
use crate::tenant::AdminIdentity;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub total_calls: i64,
    pub calls_by_endpoint: BTreeMap<String, i64>,
    pub last_24h_count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub label: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

pub async fn usage(
    State(state): State<AppState>,
    AdminIdentity(identity): AdminIdentity,
) -> Result<Json<UsageResponse>> {
    let cutoff = Utc::now() - Duration::hours(24);
    let mut txn = TenantTxn::begin(&state.db, identity.tenant_id).await?;

    let total_calls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events")
        .fetch_one(txn.conn())
        .await?;

    let by_endpoint: Vec<(String, i64)> = sqlx::query_as(
        "SELECT endpoint, COUNT(*) FROM usage_events GROUP BY endpoint ORDER BY COUNT(*) DESC",
    )
    .fetch_all(txn.conn())
    .await?;

    let last_24h_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM usage_events WHERE created_at >= $1")
            .bind(cutoff)
            .fetch_one(txn.conn())
            .await?;

    txn.commit().await?;

    Ok(Json(UsageResponse {
        total_calls,
        calls_by_endpoint: by_endpoint.into_iter().collect(),
        last_24h_count,
    }))
}

/// Lists the tenant's non-revoked keys. Plaintext keys are unknowable here by
/// construction; only hashes are stored.
pub async fn list_api_keys(
    State(state): State<AppState>,
    AdminIdentity(identity): AdminIdentity,
) -> Result<Json<Vec<ApiKeyInfo>>> {
    let keys: Vec<ApiKeyInfo> = sqlx::query_as(
        "SELECT id, label, role, is_active, created_at, last_used_at, revoked_at \
         FROM api_keys \
         WHERE tenant_id = $1 AND revoked_at IS NULL \
         ORDER BY created_at DESC",
    )
    .bind(identity.tenant_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(keys))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    AdminIdentity(identity): AdminIdentity,
    Path(key_id): Path<Uuid>,
) -> Result<Json<Value>> {
    // revoked_at is monotonic: set once, never cleared.
    let revoked: Option<Uuid> = sqlx::query_scalar(
        "UPDATE api_keys \
         SET revoked_at = now(), is_active = false \
         WHERE id = $1 AND tenant_id = $2 AND revoked_at IS NULL \
         RETURNING id",
    )
    .bind(key_id)
    .bind(identity.tenant_id)
    .fetch_optional(&state.db)
    .await?;

    let revoked = revoked
        .ok_or_else(|| AppError::NotFound("Key not found or already revoked".to_string()))?;

    tracing::info!(tenant_id = %identity.tenant_id, key_id = %revoked, "api key revoked");

    Ok(Json(json!({ "revoked": revoked })))
}
