//! Tenancy gateway: every data-plane statement runs inside a transaction whose
//! first statement binds `app.tenant_id`, the session variable the row-level
//! security policies filter on.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A tenant-bound database transaction.
///
/// Dropping the value without calling [`TenantTxn::commit`] rolls the
/// transaction back, which also covers panics and request cancellation. The
/// binding is transaction-local (`set_config(..., true)`), so it cannot
/// outlive the transaction or leak through the pool.
pub struct TenantTxn {
    txn: Transaction<'static, Postgres>,
    tenant_id: Uuid,
}

impl TenantTxn {
    /// Opens a transaction and binds it to `tenant_id` as the very first
    /// statement. A nil tenant id is a programmer error and fails immediately;
    /// even if such a binding slipped through, the NULLIF handling in the
    /// storage policies would still yield zero rows.
    pub async fn begin(pool: &PgPool, tenant_id: Uuid) -> Result<TenantTxn> {
        if tenant_id.is_nil() {
            return Err(AppError::BadRequest(
                "Tenant context is not set".to_string(),
            ));
        }

        let mut txn = pool.begin().await?;

        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(tenant_id.to_string())
            .execute(&mut *txn)
            .await?;

        Ok(TenantTxn { txn, tenant_id })
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.txn
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }
}
