//! Case lifecycle: draft creation behind the billing gate, one-shot finalize
//! with deterministic signing, idempotent replay verification, and audited
//! reads.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{
    append_audit_log, record_case_access, ACTION_FINALIZE, ACTION_VERIFY, ACTION_VIEW,
    SYSTEM_USER_ID,
};
use crate::core::canonical::ranking_signature;
use crate::db::tenant::TenantTxn;
use crate::error::{AppError, Result};
use crate::tenant::{record_usage, resolve_api_key, TenantId, API_KEY_HEADER};
use crate::AppState;

const BILLING_FREE: &str = "free";
const BILLING_STATUSES: &[&str] = &["free", "paid", "subscription"];

#[derive(Debug, Deserialize)]
pub struct CreateCaseRequest {
    pub patient_id: Uuid,
    pub input_payload: Value,
    #[serde(default)]
    pub billing_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCaseResponse {
    pub case_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub case_id: Uuid,
    pub status: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyReplayResponse {
    pub case_id: Uuid,
    pub ok: bool,
    pub expected: String,
    pub computed: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Case {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub input_payload: Value,
    pub random_seed: Option<String>,
    pub status: String,
    pub finalized_at: Option<DateTime<Utc>>,
    pub ranking_snapshot: Option<Value>,
    pub result_signature: Option<String>,
    pub replay_verified_at: Option<DateTime<Utc>>,
    pub replay_verification_ok: Option<bool>,
    pub replay_verification_details: Option<Value>,
    pub billing_status: String,
    pub api_client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Billing gate: free-tier creates are refused once the tenant's all-time
/// usage-event count exceeds the configured threshold. Runs inside the same
/// tenant-bound transaction as the insert it guards.
async fn check_billing_gate(
    txn: &mut TenantTxn,
    billing_status: &str,
    free_tier_limit: i64,
) -> Result<()> {
    if billing_status != BILLING_FREE {
        return Ok(());
    }

    let usage_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events")
        .fetch_one(txn.conn())
        .await?;

    if usage_count > free_tier_limit {
        return Err(AppError::PaymentRequired(format!(
            "Free tier limit reached ({usage_count} usage events); upgrade to continue"
        )));
    }
    Ok(())
}

pub async fn create_case(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    headers: HeaderMap,
    Json(payload): Json<CreateCaseRequest>,
) -> Result<Json<CreateCaseResponse>> {
    let billing_status = payload
        .billing_status
        .as_deref()
        .unwrap_or(BILLING_FREE)
        .to_string();
    if !BILLING_STATUSES.contains(&billing_status.as_str()) {
        return Err(AppError::Validation(format!(
            "billing_status must be one of: {}",
            BILLING_STATUSES.join(", ")
        )));
    }

    // An API key is optional here, but when present it must resolve and must
    // belong to the tenant named in the header.
    let api_client_id = match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw_key) => {
            let identity = resolve_api_key(&state, raw_key).await?;
            if identity.tenant_id != tenant_id {
                return Err(AppError::Unauthenticated(
                    "API key does not belong to the requested tenant".to_string(),
                ));
            }
            record_usage(&state, &identity, "/cases");
            Some(identity.key_id.to_string())
        }
        None => None,
    };

    let case_id = Uuid::new_v4();
    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;

    check_billing_gate(&mut txn, &billing_status, state.config.free_tier_case_limit).await?;

    sqlx::query(
        "INSERT INTO cases (id, tenant_id, patient_id, input_payload, random_seed, status, billing_status, api_client_id) \
         VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7)",
    )
    .bind(case_id)
    .bind(tenant_id)
    .bind(payload.patient_id)
    .bind(&payload.input_payload)
    .bind("0")
    .bind(&billing_status)
    .bind(&api_client_id)
    .execute(txn.conn())
    .await?;

    txn.commit().await?;

    Ok(Json(CreateCaseResponse {
        case_id,
        status: "draft".to_string(),
    }))
}

pub async fn finalize_case(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(case_id): Path<Uuid>,
) -> Result<Json<FinalizeResponse>> {
    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;

    let row: Option<(String, Value, String)> = sqlx::query_as(
        "SELECT status, input_payload, COALESCE(random_seed, '0') FROM cases WHERE id = $1",
    )
    .bind(case_id)
    .fetch_optional(txn.conn())
    .await?;

    let (status, input_payload, random_seed) =
        row.ok_or_else(|| AppError::NotFound("Case not found".to_string()))?;
    if status != "draft" {
        return Err(AppError::Lifecycle(
            "Only draft cases can be finalized".to_string(),
        ));
    }

    let ranking = tokio::time::timeout(
        state.config.scoring_deadline,
        state
            .scoring
            .score(case_id, &input_payload, &json!({}), &random_seed),
    )
    .await
    .map_err(|_| AppError::Unavailable("Scoring deadline exceeded".to_string()))?
    .map_err(|err| AppError::Unavailable(err.to_string()))?;

    if ranking.is_empty() {
        return Err(AppError::Unavailable(
            "Scoring engine returned an empty ranking".to_string(),
        ));
    }

    for row in &ranking {
        sqlx::query(
            "INSERT INTO case_results (case_id, rank, remedy_name, raw_score) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(case_id)
        .bind(row.rank)
        .bind(&row.remedy)
        .bind(row.score)
        .execute(txn.conn())
        .await?;
    }

    // Read back in canonical order; the stored rows, not the in-memory
    // ranking, are the source of truth for the snapshot.
    let result_rows: Vec<(i32, String, f64)> = sqlx::query_as(
        "SELECT rank, remedy_name, raw_score FROM case_results \
         WHERE case_id = $1 \
         ORDER BY rank ASC, remedy_name ASC",
    )
    .bind(case_id)
    .fetch_all(txn.conn())
    .await?;

    let snapshot = Value::Array(
        result_rows
            .iter()
            .map(|(rank, remedy, score)| json!({"rank": rank, "remedy": remedy, "score": score}))
            .collect(),
    );
    let signature = ranking_signature(&snapshot)?;

    // The status guard linearizes concurrent finalize attempts: exactly one
    // update sees the draft row.
    let updated = sqlx::query(
        "UPDATE cases \
         SET status = 'finalized', finalized_at = now(), ranking_snapshot = $1, result_signature = $2 \
         WHERE id = $3 AND status = 'draft'",
    )
    .bind(&snapshot)
    .bind(&signature)
    .bind(case_id)
    .execute(txn.conn())
    .await?;

    if updated.rows_affected() != 1 {
        return Err(AppError::Lifecycle(
            "Only draft cases can be finalized".to_string(),
        ));
    }

    append_audit_log(
        txn.conn(),
        tenant_id,
        SYSTEM_USER_ID,
        ACTION_FINALIZE,
        "cases",
        Some(case_id),
        json!({"auto": true, "ts": Utc::now().timestamp()}),
    )
    .await?;

    txn.commit().await?;

    Ok(Json(FinalizeResponse {
        case_id,
        status: "finalized".to_string(),
        signature,
    }))
}

pub async fn verify_replay(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(case_id): Path<Uuid>,
) -> Result<Json<VerifyReplayResponse>> {
    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;

    let row: Option<(String, Option<Value>, Option<String>)> = sqlx::query_as(
        "SELECT status, ranking_snapshot, result_signature FROM cases WHERE id = $1",
    )
    .bind(case_id)
    .fetch_optional(txn.conn())
    .await?;

    let (status, snapshot, signature) =
        row.ok_or_else(|| AppError::NotFound("Case not found".to_string()))?;
    if status != "finalized" {
        return Err(AppError::Lifecycle(
            "Only finalized cases can be replay-verified".to_string(),
        ));
    }
    let snapshot = snapshot.ok_or_else(|| {
        AppError::Lifecycle("Finalized case has no ranking snapshot".to_string())
    })?;
    let expected = signature.ok_or_else(|| {
        AppError::Lifecycle("Finalized case has no result signature".to_string())
    })?;

    let computed = ranking_signature(&snapshot)?;
    let ok = computed == expected;
    let verified_at = Utc::now();

    // Only the three replay_* columns move; the immutability trigger rejects
    // anything else on a finalized row.
    sqlx::query(
        "UPDATE cases \
         SET replay_verified_at = $1, replay_verification_ok = $2, replay_verification_details = $3 \
         WHERE id = $4",
    )
    .bind(verified_at)
    .bind(ok)
    .bind(json!({"expected": expected, "computed": computed, "match": ok}))
    .bind(case_id)
    .execute(txn.conn())
    .await?;

    txn.commit().await?;

    record_case_access(&state.db, tenant_id, case_id, ACTION_VERIFY).await;

    Ok(Json(VerifyReplayResponse {
        case_id,
        ok,
        expected,
        computed,
        verified_at,
    }))
}

pub async fn get_case(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(case_id): Path<Uuid>,
) -> Result<Json<Case>> {
    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;

    let case: Option<Case> = sqlx::query_as("SELECT * FROM cases WHERE id = $1")
        .bind(case_id)
        .fetch_optional(txn.conn())
        .await?;
    txn.commit().await?;

    // Row-level security makes a cross-tenant case indistinguishable from an
    // absent one.
    let case = case.ok_or_else(|| AppError::NotFound("Case not found".to_string()))?;

    record_case_access(&state.db, tenant_id, case_id, ACTION_VIEW).await;

    Ok(Json(case))
}
