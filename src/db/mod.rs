//! Database layer
//!
//! SQLite persistence for:
//! - Credential records (the durable credential store)
//! - The latest rotation condition of each identity

pub mod condition_repository;
pub mod credential_repository;

pub use condition_repository::SqliteStatusReporter;
pub use credential_repository::SqliteCredentialStore;

use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};

use crate::config::DatabaseConfig;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .with_context(|| format!("Failed to connect to database {}", config.url))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
