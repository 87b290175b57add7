//! Single-use tenant provisioning, guarded by a deployment-wide shared
//! secret. Idempotent per tenant name; every call mints exactly one fresh API
//! key and returns the plaintext exactly once.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::tenant::{generate_api_key, hash_api_key};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub tenant_name: String,
    #[serde(default)]
    pub admin_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub tenant_id: Uuid,
    pub api_key: String,
    pub message: String,
}

fn check_bootstrap_token(state: &AppState, authorization: Option<&str>) -> Result<()> {
    let token = state.config.bootstrap_token.as_deref().ok_or_else(|| {
        AppError::Unavailable("Bootstrap is disabled (BOOTSTRAP_TOKEN not set)".to_string())
    })?;

    let expected = format!("Bearer {token}");
    let presented = authorization.unwrap_or("");
    // Constant-time comparison; ct_eq is false for mismatched lengths.
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::Unauthenticated(
            "Invalid bootstrap token".to_string(),
        ))
    }
}

pub async fn bootstrap_tenant(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<BootstrapRequest>,
) -> Result<(StatusCode, Json<BootstrapResponse>)> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    check_bootstrap_token(&state, authorization)?;

    let tenant_name = payload.tenant_name.trim();
    if tenant_name.is_empty() {
        return Err(AppError::Validation(
            "tenant_name must not be empty".to_string(),
        ));
    }

    let raw_key = generate_api_key();
    let key_hash = hash_api_key(&raw_key);

    // tenants and api_keys sit outside the tenant partition, so this runs on
    // a plain transaction rather than a tenant-bound one.
    let mut txn = state.db.begin().await?;

    sqlx::query("INSERT INTO tenants (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(tenant_name)
        .execute(&mut *txn)
        .await?;

    let tenant_id: Uuid = sqlx::query_scalar("SELECT id FROM tenants WHERE name = $1")
        .bind(tenant_name)
        .fetch_one(&mut *txn)
        .await?;

    sqlx::query(
        "INSERT INTO api_keys (tenant_id, key_hash, label, role, is_active) \
         VALUES ($1, $2, $3, 'user', true)",
    )
    .bind(tenant_id)
    .bind(&key_hash)
    .bind(format!("bootstrap-{tenant_name}"))
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;

    tracing::info!(%tenant_id, tenant_name, "tenant bootstrapped");

    Ok((
        StatusCode::CREATED,
        Json(BootstrapResponse {
            tenant_id,
            api_key: raw_key,
            message: format!("Tenant '{tenant_name}' provisioned."),
        }),
    ))
}
