//! Tenant identity resolution: header-based tenant binding, API-key
//! authentication, and the role gate for the admin surface.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use uuid::Uuid;

use crate::core::canonical::sha256_hex;
use crate::db::tenant::TenantTxn;
use crate::error::{AppError, Result};
use crate::AppState;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// SHA-256 hex of the raw key bytes. Deterministic and unsalted so the hash
/// doubles as the lookup token; the plaintext is never stored.
pub fn hash_api_key(raw_key: &str) -> String {
    sha256_hex(raw_key.as_bytes())
}

/// Mints a fresh plaintext API key: 32 random bytes, URL-safe base64.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Tenant identity taken from the X-Tenant-ID header, for surfaces where API
/// keys are not required. The value only names the binding; row visibility is
/// still enforced by the storage policies.
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for TenantId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self> {
        let raw = header_str(&parts.headers, TENANT_ID_HEADER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing X-Tenant-ID header".to_string()))?;

        let tenant_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::BadRequest("X-Tenant-ID is not a valid UUID".to_string()))?;

        Ok(TenantId(tenant_id))
    }
}

/// Authenticated API-key identity. Resolving it appends a usage event for the
/// tenant off the request path.
#[derive(Debug, Clone)]
pub struct ApiKeyIdentity {
    pub tenant_id: Uuid,
    pub key_id: Uuid,
    pub role: String,
}

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let raw_key = header_str(&parts.headers, API_KEY_HEADER)
            .ok_or_else(|| AppError::Unauthenticated("Missing X-API-Key header".to_string()))?;

        let identity = resolve_api_key(state, raw_key).await?;
        record_usage(state, &identity, parts.uri.path());
        Ok(identity)
    }
}

pub async fn resolve_api_key(state: &AppState, raw_key: &str) -> Result<ApiKeyIdentity> {
    let key_hash = hash_api_key(raw_key);

    let row: Option<(Uuid, Uuid, String)> = sqlx::query_as(
        "SELECT tenant_id, id, role FROM api_keys \
         WHERE key_hash = $1 AND is_active = true AND revoked_at IS NULL \
         LIMIT 1",
    )
    .bind(&key_hash)
    .fetch_optional(&state.db)
    .await?;

    let (tenant_id, key_id, role) = row.ok_or_else(|| {
        AppError::Unauthenticated("Invalid or inactive API key".to_string())
    })?;

    Ok(ApiKeyIdentity {
        tenant_id,
        key_id,
        role,
    })
}

/// Fire-and-forget usage tracking: one usage_events row plus a last_used_at
/// stamp per successful authentication. Must never block or fail the request.
pub fn record_usage(state: &AppState, identity: &ApiKeyIdentity, endpoint: &str) {
    let pool = state.db.clone();
    let tenant_id = identity.tenant_id;
    let key_id = identity.key_id;
    let endpoint = endpoint.to_string();

    tokio::spawn(async move {
        let result = async {
            let mut txn = TenantTxn::begin(&pool, tenant_id).await?;
            sqlx::query(
                "INSERT INTO usage_events (tenant_id, api_key_id, endpoint) VALUES ($1, $2, $3)",
            )
            .bind(tenant_id)
            .bind(key_id)
            .bind(&endpoint)
            .execute(txn.conn())
            .await?;
            sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
                .bind(key_id)
                .execute(txn.conn())
                .await?;
            txn.commit().await
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(%tenant_id, %endpoint, error = %err, "usage event append failed");
        }
    });
}

/// API-key identity restricted to role `admin`. The admin surface stays
/// tenant-bound; the role only widens which endpoints may be called.
#[derive(Debug, Clone)]
pub struct AdminIdentity(pub ApiKeyIdentity);

#[async_trait]
impl FromRequestParts<AppState> for AdminIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let identity = ApiKeyIdentity::from_request_parts(parts, state).await?;
        if identity.role != "admin" {
            return Err(AppError::Forbidden("Admin role required".to_string()));
        }
        Ok(AdminIdentity(identity))
    }
}

/// Tenant resolution for surfaces reachable with either an API key or a bare
/// tenant header (the feedback endpoints). The API key wins when both are
/// present.
#[derive(Debug, Clone, Copy)]
pub struct CallerTenant(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for CallerTenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if header_str(&parts.headers, API_KEY_HEADER).is_some() {
            let identity = ApiKeyIdentity::from_request_parts(parts, state).await?;
            return Ok(CallerTenant(identity.tenant_id));
        }

        if let Some(raw) = header_str(&parts.headers, TENANT_ID_HEADER) {
            let tenant_id = Uuid::parse_str(raw.trim()).map_err(|_| {
                AppError::BadRequest("X-Tenant-ID is not a valid UUID".to_string())
            })?;
            return Ok(CallerTenant(tenant_id));
        }

        Err(AppError::Unauthenticated(
            "Missing auth: provide X-API-Key or X-Tenant-ID header".to_string(),
        ))
    }
}
