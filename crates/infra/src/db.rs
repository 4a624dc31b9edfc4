//! Connection pool and schema migrations.

use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::DatabaseSettings;
use crate::store::PgStore;

/// Open a connection pool sized from `settings`.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&settings.url)
        .await
}

/// Open a pool and wrap it in a [`PgStore`] with the configured lock timeout.
pub async fn connect_store(settings: &DatabaseSettings) -> Result<PgStore, sqlx::Error> {
    let pool = connect(settings).await?;
    Ok(PgStore::new(pool).with_lock_timeout(Duration::from_millis(settings.lock_timeout_ms)))
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
