mod common;

use axum::http::StatusCode;
use common::{
    insert_api_key, insert_tenant, send, setup_test_db, test_app, test_config, test_state,
    TEST_BOOTSTRAP_TOKEN,
};
use serde_json::json;

#[tokio::test]
async fn bootstrap_requires_the_shared_token() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let (status, _) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", "Bearer WRONG")],
        Some(json!({"tenant_name": "clinic-one"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bearer = format!("Bearer {TEST_BOOTSTRAP_TOKEN}");
    let (status, body) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", &bearer)],
        Some(json!({"tenant_name": "clinic-one"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["api_key"].as_str().unwrap().len() >= 32);
    assert!(body["tenant_id"].is_string());
}

#[tokio::test]
async fn bootstrap_is_disabled_without_a_configured_token() {
    let (db, _container) = setup_test_db().await;
    let mut config = test_config();
    config.bootstrap_token = None;
    let app = clincase::create_app(test_state(&db, config));

    let (status, body) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", "Bearer anything")],
        Some(json!({"tenant_name": "clinic-x"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("disabled"));
}

#[tokio::test]
async fn bootstrap_is_idempotent_per_tenant_name() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);
    let bearer = format!("Bearer {TEST_BOOTSTRAP_TOKEN}");

    let (status, first) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", &bearer)],
        Some(json!({"tenant_name": "repeat-clinic"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", &bearer)],
        Some(json!({"tenant_name": "repeat-clinic"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same tenant both times, but each call mints a fresh key.
    assert_eq!(first["tenant_id"], second["tenant_id"]);
    assert_ne!(first["api_key"], second["api_key"]);

    let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenants WHERE name = $1")
        .bind("repeat-clinic")
        .fetch_one(&db.admin)
        .await
        .unwrap();
    assert_eq!(tenants, 1);

    let keys: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM api_keys WHERE tenant_id = (SELECT id FROM tenants WHERE name = $1)",
    )
    .bind("repeat-clinic")
    .fetch_one(&db.admin)
    .await
    .unwrap();
    assert_eq!(keys, 2);
}

#[tokio::test]
async fn rotation_invalidates_the_old_key() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);
    let bearer = format!("Bearer {TEST_BOOTSTRAP_TOKEN}");

    let (_, booted) = send(
        &app,
        "POST",
        "/bootstrap",
        &[("Authorization", &bearer)],
        Some(json!({"tenant_name": "rotating-clinic"})),
    )
    .await;
    let old_key = booted["api_key"].as_str().unwrap().to_string();
    let tenant_id = booted["tenant_id"].as_str().unwrap().to_string();

    let (status, rotated) = send(
        &app,
        "POST",
        "/auth/api-keys/rotate",
        &[("X-API-Key", &old_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{rotated}");
    let new_key = rotated["api_key"].as_str().unwrap().to_string();
    assert_ne!(new_key, old_key);
    assert_eq!(rotated["tenant_id"].as_str().unwrap(), tenant_id);

    // Old key no longer authenticates.
    let (status, _) = send(
        &app,
        "POST",
        "/auth/api-keys/rotate",
        &[("X-API-Key", &old_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // New key resolves to the same tenant.
    let (status, re_rotated) = send(
        &app,
        "POST",
        "/auth/api-keys/rotate",
        &[("X-API-Key", &new_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(re_rotated["tenant_id"].as_str().unwrap(), tenant_id);
}

#[tokio::test]
async fn admin_surface_requires_the_admin_role() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "role-tenant").await;
    let (_, user_key) = insert_api_key(&db.admin, tenant, "user").await;
    let (_, admin_key) = insert_api_key(&db.admin, tenant, "admin").await;

    let (status, _) = send(&app, "GET", "/admin/usage", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "GET",
        "/admin/usage",
        &[("X-API-Key", &user_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "GET",
        "/admin/usage",
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn revoked_keys_stop_authenticating() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "revoke-tenant").await;
    let (victim_id, victim_key) = insert_api_key(&db.admin, tenant, "user").await;
    let (_, admin_key) = insert_api_key(&db.admin, tenant, "admin").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/admin/api-keys/revoke/{victim_id}"),
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["revoked"].as_str().unwrap(), victim_id.to_string());

    let (status, _) = send(
        &app,
        "POST",
        "/auth/api-keys/rotate",
        &[("X-API-Key", &victim_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Second revoke of the same key is a 404.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/admin/api-keys/revoke/{victim_id}"),
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn key_listing_exposes_metadata_but_never_plaintext() {
    let (db, _container) = setup_test_db().await;
    let app = test_app(&db);

    let tenant = insert_tenant(&db.admin, "listing-tenant").await;
    let (_, admin_key) = insert_api_key(&db.admin, tenant, "admin").await;
    insert_api_key(&db.admin, tenant, "user").await;

    let (status, body) = send(
        &app,
        "GET",
        "/admin/api-keys",
        &[("X-API-Key", &admin_key)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let keys = body.as_array().unwrap();
    assert_eq!(keys.len(), 2);
    for key in keys {
        assert!(key["id"].is_string());
        assert!(key["role"].is_string());
        assert!(key.get("key_hash").is_none());
        assert!(key.get("api_key").is_none());
    }
}
