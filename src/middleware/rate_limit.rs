//! Per-tenant sliding-window rate limiter. One async mutex per tenant bucket;
//! a meta mutex guards bucket creation and lookup only, so tenants never
//! contend on each other's hot path.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// Paths exempt from rate limiting: probes and provisioning carry no tenant
/// identity worth metering, and the feedback surface is deliberately open.
const BYPASS_PATHS: &[&str] = &["/health/live", "/health/ready", "/version", "/bootstrap"];
const BYPASS_PREFIXES: &[&str] = &["/mcare"];

type Bucket = Arc<Mutex<VecDeque<Instant>>>;

pub struct TenantRateLimiter {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<Uuid, Bucket>>,
}

impl TenantRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        TenantRateLimiter {
            limit: limit as usize,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn bucket(&self, key: Uuid) -> Bucket {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Admits the request if the tenant has made fewer than `limit` requests
    /// within the window; an admitted slot is consumed and stands.
    pub async fn is_allowed(&self, key: Uuid) -> bool {
        let bucket = self.bucket(key).await;
        let now = Instant::now();

        let mut timestamps = bucket.lock().await;
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.limit {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Drops buckets whose newest entry is older than `idle`. Tenants are
    /// long-lived, so callers invoke this lazily if at all.
    pub async fn evict_inactive(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        let mut stale = Vec::new();
        for (key, bucket) in buckets.iter() {
            let timestamps = bucket.lock().await;
            let inactive = timestamps
                .back()
                .map(|last| now.duration_since(*last) >= idle)
                .unwrap_or(true);
            if inactive {
                stale.push(*key);
            }
        }

        for key in &stale {
            buckets.remove(key);
        }
        stale.len()
    }
}

fn resolvable_tenant(req: &Request) -> Option<Uuid> {
    req.headers()
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

/// Middleware: enforced only for requests carrying a resolvable tenant
/// identity; over-limit requests are refused before any database work.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if BYPASS_PATHS.contains(&path) || BYPASS_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return next.run(req).await;
    }

    if let Some(tenant_id) = resolvable_tenant(&req) {
        if !state.rate_limiter.is_allowed(tenant_id).await {
            return AppError::RateLimited(state.config.rate_limit_per_minute).into_response();
        }
    }

    next.run(req).await
}
