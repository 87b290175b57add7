//! Database access layer. Pool construction lives here and only here: every
//! statement against a tenant-partitioned table must run through
//! [`tenant::TenantTxn`], and a repository test asserts no other module builds
//! a pool.

pub mod tenant;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::Config;

pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
}
