//! Clinician feedback: append-only outcome ledger plus tenant-scoped
//! aggregation. Feedback is observational; nothing written here ever reaches
//! the scoring engine.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::canonical::narrative_hash;
use crate::db::tenant::TenantTxn;
use crate::error::{AppError, Result};
use crate::tenant::CallerTenant;
use crate::AppState;

const VALID_OUTCOME_TYPES: &[&str] = &["agree", "disagree", "followup", "adverse", "unknown"];
const MAX_TOP3: usize = 5;
const MAX_NOTES_LEN: usize = 2048;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// Used for hashing only; the raw narrative is never persisted.
    #[serde(default)]
    pub narrative: Option<String>,
    pub predicted_top1: String,
    pub predicted_top3: Vec<String>,
    pub chosen_remedy: String,
    pub outcome_type: String,
    #[serde(default)]
    pub outcome_score: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub case_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_correct: bool,
}

#[derive(Debug, Serialize)]
pub struct Mismatch {
    pub predicted_top1: String,
    pub chosen_remedy: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct FeedbackSummaryResponse {
    pub total_count: i64,
    pub top1_accuracy: f64,
    pub top3_coverage: f64,
    pub outcome_counts: BTreeMap<String, i64>,
    pub top_mismatches: Vec<Mismatch>,
    pub days: i64,
}

struct ValidatedFeedback {
    predicted_top1: String,
    predicted_top3: Vec<String>,
    chosen_remedy: String,
    outcome_type: String,
}

fn validate(payload: &FeedbackRequest) -> Result<ValidatedFeedback> {
    let predicted_top1 = payload.predicted_top1.trim().to_string();
    if predicted_top1.is_empty() || predicted_top1.len() > 64 {
        return Err(AppError::Validation(
            "predicted_top1 must be a non-empty string of at most 64 characters".to_string(),
        ));
    }

    let chosen_remedy = payload.chosen_remedy.trim().to_string();
    if chosen_remedy.is_empty() || chosen_remedy.len() > 64 {
        return Err(AppError::Validation(
            "chosen_remedy must be a non-empty string of at most 64 characters".to_string(),
        ));
    }

    let outcome_type = payload.outcome_type.clone();
    if !VALID_OUTCOME_TYPES.contains(&outcome_type.as_str()) {
        return Err(AppError::Validation(format!(
            "outcome_type must be one of: {}",
            VALID_OUTCOME_TYPES.join(", ")
        )));
    }

    if let Some(score) = payload.outcome_score {
        if !(1..=10).contains(&score) {
            return Err(AppError::Validation(
                "outcome_score must be between 1 and 10".to_string(),
            ));
        }
    }

    if payload.notes.as_deref().map(str::len).unwrap_or(0) > MAX_NOTES_LEN {
        return Err(AppError::Validation(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    if payload.locale.as_deref().map(str::len).unwrap_or(0) > 10 {
        return Err(AppError::Validation(
            "locale must be at most 10 characters".to_string(),
        ));
    }
    if payload.request_id.as_deref().map(str::len).unwrap_or(0) > 128 {
        return Err(AppError::Validation(
            "request_id must be at most 128 characters".to_string(),
        ));
    }

    // Cap at five entries, dropping empties.
    let mut predicted_top3: Vec<String> = payload
        .predicted_top3
        .iter()
        .take(MAX_TOP3)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if predicted_top3.is_empty() {
        return Err(AppError::Validation(
            "predicted_top3 must contain at least one non-empty remedy".to_string(),
        ));
    }

    // Best-effort: make sure the top-1 prediction appears in the top-3 list.
    if !predicted_top3.contains(&predicted_top1) {
        predicted_top3.insert(0, predicted_top1.clone());
        predicted_top3.truncate(MAX_TOP3);
    }

    Ok(ValidatedFeedback {
        predicted_top1,
        predicted_top3,
        chosen_remedy,
        outcome_type,
    })
}

pub async fn post_feedback(
    State(state): State<AppState>,
    CallerTenant(tenant_id): CallerTenant,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>> {
    let validated = validate(&payload)?;

    let n_hash = payload
        .narrative
        .as_deref()
        .map(|narrative| narrative_hash(narrative, payload.locale.as_deref()));

    let feedback_id = Uuid::new_v4();
    let created_at = Utc::now();
    let metadata = payload.metadata.clone().unwrap_or_else(|| json!({}));

    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;
    sqlx::query(
        "INSERT INTO mcare_feedback ( \
             id, tenant_id, case_id, request_id, locale, narrative_hash, \
             predicted_top1, predicted_top3, chosen_remedy, outcome_type, \
             outcome_score, notes, metadata, created_at \
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(feedback_id)
    .bind(tenant_id)
    .bind(payload.case_id)
    .bind(&payload.request_id)
    .bind(&payload.locale)
    .bind(&n_hash)
    .bind(&validated.predicted_top1)
    .bind(json!(validated.predicted_top3))
    .bind(&validated.chosen_remedy)
    .bind(&validated.outcome_type)
    .bind(payload.outcome_score)
    .bind(&payload.notes)
    .bind(&metadata)
    .bind(created_at)
    .execute(txn.conn())
    .await?;
    txn.commit().await?;

    Ok(Json(FeedbackResponse {
        id: feedback_id,
        created_at,
        is_correct: validated.chosen_remedy == validated.predicted_top1,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    #[serde(default)]
    pub days: Option<String>,
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub async fn feedback_summary(
    State(state): State<AppState>,
    CallerTenant(tenant_id): CallerTenant,
    Query(params): Query<SummaryParams>,
) -> Result<Json<FeedbackSummaryResponse>> {
    let days: i64 = match params.days {
        None => 30,
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::BadRequest("days must be an integer".to_string()))?,
    };
    if !(1..=365).contains(&days) {
        return Err(AppError::BadRequest(
            "days must be between 1 and 365".to_string(),
        ));
    }

    let cutoff = Utc::now() - Duration::days(days);
    let mut txn = TenantTxn::begin(&state.db, tenant_id).await?;

    let total_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mcare_feedback WHERE created_at >= $1")
            .bind(cutoff)
            .fetch_one(txn.conn())
            .await?;

    if total_count == 0 {
        txn.commit().await?;
        return Ok(Json(FeedbackSummaryResponse {
            total_count: 0,
            top1_accuracy: 0.0,
            top3_coverage: 0.0,
            outcome_counts: BTreeMap::new(),
            top_mismatches: Vec::new(),
            days,
        }));
    }

    let top1_correct: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM mcare_feedback \
         WHERE created_at >= $1 AND chosen_remedy = predicted_top1",
    )
    .bind(cutoff)
    .fetch_one(txn.conn())
    .await?;

    let top3_covered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM mcare_feedback \
         WHERE created_at >= $1 AND predicted_top3 @> to_jsonb(chosen_remedy)",
    )
    .bind(cutoff)
    .fetch_one(txn.conn())
    .await?;

    let outcome_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT outcome_type, COUNT(*) FROM mcare_feedback \
         WHERE created_at >= $1 \
         GROUP BY outcome_type ORDER BY COUNT(*) DESC",
    )
    .bind(cutoff)
    .fetch_all(txn.conn())
    .await?;

    let mismatch_rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT predicted_top1, chosen_remedy, COUNT(*) FROM mcare_feedback \
         WHERE created_at >= $1 AND chosen_remedy != predicted_top1 \
         GROUP BY predicted_top1, chosen_remedy \
         ORDER BY COUNT(*) DESC \
         LIMIT 10",
    )
    .bind(cutoff)
    .fetch_all(txn.conn())
    .await?;

    txn.commit().await?;

    Ok(Json(FeedbackSummaryResponse {
        total_count,
        top1_accuracy: round4(top1_correct as f64 / total_count as f64),
        top3_coverage: round4(top3_covered as f64 / total_count as f64),
        outcome_counts: outcome_rows.into_iter().collect(),
        top_mismatches: mismatch_rows
            .into_iter()
            .map(|(predicted_top1, chosen_remedy, count)| Mismatch {
                predicted_top1,
                chosen_remedy,
                count,
            })
            .collect(),
        days,
    }))
}
