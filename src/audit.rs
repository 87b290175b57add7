//! Append helpers for the audit and access trails.
//!
//! Audit rows (lifecycle thresholds such as FINALIZE) are written inside the
//! business transaction so they commit or roll back with it. Access rows
//! (sensitive reads) are best-effort: they run in their own tenant-bound
//! transaction after the business work and a failure is logged, never
//! propagated.

use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::tenant::TenantTxn;
use crate::error::Result;

/// Well-known actor for writes driven by the platform itself rather than an
/// end user.
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

pub const ACTION_VIEW: &str = "VIEW";
pub const ACTION_VERIFY: &str = "VERIFY";
pub const ACTION_FINALIZE: &str = "FINALIZE";

pub async fn append_audit_log(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    action: &str,
    table_name: &str,
    record_id: Option<Uuid>,
    metadata: Value,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_logs (tenant_id, user_id, action, table_name, record_id, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(action)
    .bind(table_name)
    .bind(record_id)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(())
}

async fn append_access_log(pool: &PgPool, tenant_id: Uuid, case_id: Uuid, action: &str) -> Result<()> {
    let mut txn = TenantTxn::begin(pool, tenant_id).await?;
    let bound_tenant = txn.tenant_id();
    sqlx::query(
        "INSERT INTO access_logs (tenant_id, user_id, case_id, action) VALUES ($1, $2, $3, $4)",
    )
    .bind(bound_tenant)
    .bind(SYSTEM_USER_ID)
    .bind(case_id)
    .bind(action)
    .execute(txn.conn())
    .await?;
    txn.commit().await
}

/// Best-effort access trail append; swallows and logs failures.
pub async fn record_case_access(pool: &PgPool, tenant_id: Uuid, case_id: Uuid, action: &str) {
    if let Err(err) = append_access_log(pool, tenant_id, case_id, action).await {
        tracing::warn!(%tenant_id, %case_id, action, error = %err, "access log append failed");
    }
}
