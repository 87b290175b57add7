mod common;

use axum::http::StatusCode;
use common::{
    insert_api_key, insert_patient, insert_tenant, insert_usage_events, send, setup_test_db,
    test_app,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn admin_usage_aggregates_per_endpoint() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "usage-tenant").await;
    let (key_id, admin_key) = insert_api_key(&db.admin, tenant, "admin").await;

    insert_usage_events(&db.admin, tenant, key_id, "/cases", 5).await;
    insert_usage_events(&db.admin, tenant, key_id, "/auth/api-keys/rotate", 2).await;

    let (status, body) = send(
        &app,
        "GET",
        "/admin/usage",
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    // The call itself appends a usage event off the request path, so totals
    // are lower bounds; the seeded endpoints are exact.
    assert!(body["total_calls"].as_i64().unwrap() >= 7);
    assert_eq!(body["calls_by_endpoint"]["/cases"], 5);
    assert_eq!(body["calls_by_endpoint"]["/auth/api-keys/rotate"], 2);
    assert!(body["last_24h_count"].as_i64().unwrap() >= 7);
}

#[tokio::test]
async fn usage_is_tenant_scoped() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant_a = insert_tenant(&db.admin, "usage-a").await;
    let tenant_b = insert_tenant(&db.admin, "usage-b").await;
    let (key_a, _) = insert_api_key(&db.admin, tenant_a, "user").await;
    let (_, admin_b) = insert_api_key(&db.admin, tenant_b, "admin").await;

    insert_usage_events(&db.admin, tenant_a, key_a, "/cases", 9).await;

    let (status, body) = send(
        &app,
        "GET",
        "/admin/usage",
        &[("X-API-Key", &admin_b)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // None of tenant A's nine /cases events are visible to tenant B; at most
    // B's own in-flight auth event can appear.
    assert!(body["calls_by_endpoint"].get("/cases").is_none());
    assert!(body["total_calls"].as_i64().unwrap() <= 1);
}

#[tokio::test]
async fn successful_auth_appends_a_usage_event() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "side-effect-tenant").await;
    let (key_id, admin_key) = insert_api_key(&db.admin, tenant, "admin").await;

    let (status, _) = send(
        &app,
        "GET",
        "/admin/usage",
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The append is fire-and-forget; poll briefly for it to land.
    let mut recorded = 0_i64;
    for _ in 0..50 {
        recorded = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_events WHERE api_key_id = $1 AND endpoint = '/admin/usage'",
        )
        .bind(key_id)
        .fetch_one(&db.admin)
        .await
        .unwrap();
        if recorded > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(recorded >= 1, "usage event was never recorded");

    let last_used: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT last_used_at FROM api_keys WHERE id = $1")
            .bind(key_id)
            .fetch_one(&db.admin)
            .await
            .unwrap();
    assert!(last_used.is_some());
}

#[tokio::test]
async fn free_tier_over_quota_gets_a_402() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "gated-tenant").await;
    let (key_id, _) = insert_api_key(&db.admin, tenant, "user").await;
    let patient = insert_patient(&db.app, tenant, "Gated Patient").await;
    let tenant_header = tenant.to_string();

    insert_usage_events(&db.admin, tenant, key_id, "/cases", 1001).await;

    let (status, body) = send(
        &app,
        "POST",
        "/cases",
        &[("X-Tenant-ID", &tenant_header)],
        Some(json!({"patient_id": patient, "input_payload": {"symptom_ids": [1]}})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");

    // Paid tier bypasses the gate.
    let (status, body) = send(
        &app,
        "POST",
        "/cases",
        &[("X-Tenant-ID", &tenant_header)],
        Some(json!({
            "patient_id": patient,
            "input_payload": {"symptom_ids": [1]},
            "billing_status": "paid",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn under_quota_free_tier_creates_fine() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "under-quota-tenant").await;
    let (key_id, _) = insert_api_key(&db.admin, tenant, "user").await;
    let patient = insert_patient(&db.app, tenant, "Under Quota Patient").await;

    insert_usage_events(&db.admin, tenant, key_id, "/cases", 10).await;

    let (status, body) = send(
        &app,
        "POST",
        "/cases",
        &[("X-Tenant-ID", &tenant.to_string())],
        Some(json!({"patient_id": patient, "input_payload": {"symptom_ids": [2]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "draft");
}
