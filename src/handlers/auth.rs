//! API-key rotation: deactivate every row matching the presented key hash and
//! insert the replacement in the same transaction, so there is no window where
//! both or neither authenticate.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::tenant::{generate_api_key, hash_api_key, record_usage, resolve_api_key, API_KEY_HEADER};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RotateKeyResponse {
    pub api_key: String,
    pub tenant_id: Uuid,
}

pub async fn rotate_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RotateKeyResponse>> {
    let raw_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("Missing X-API-Key header".to_string()))?;

    let identity = resolve_api_key(&state, raw_key).await?;
    record_usage(&state, &identity, "/auth/api-keys/rotate");
    let old_hash = hash_api_key(raw_key);

    let new_raw = generate_api_key();
    let new_hash = hash_api_key(&new_raw);

    let mut txn = state.db.begin().await?;

    sqlx::query("UPDATE api_keys SET is_active = false WHERE key_hash = $1")
        .bind(&old_hash)
        .execute(&mut *txn)
        .await?;

    // The replacement keeps the presented key's role and tenant.
    sqlx::query(
        "INSERT INTO api_keys (tenant_id, key_hash, label, role, is_active) \
         VALUES ($1, $2, 'rotated', $3, true)",
    )
    .bind(identity.tenant_id)
    .bind(&new_hash)
    .bind(&identity.role)
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;

    tracing::info!(tenant_id = %identity.tenant_id, key_id = %identity.key_id, "api key rotated");

    Ok(Json(RotateKeyResponse {
        api_key: new_raw,
        tenant_id: identity.tenant_id,
    }))
}
