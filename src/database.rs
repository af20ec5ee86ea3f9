use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

/// Opens a write transaction right away.
///
/// A deferred transaction that reads before it writes fails with
/// `SQLITE_BUSY` when another writer got there first; an immediate one waits
/// for the lock instead.
pub(crate) const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[tracing::instrument(skip(url))]
pub async fn setup_database(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    info!("Connecting to SQLite database at {url}");
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    info!("Running migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Done!");
    Ok(pool)
}

/// A migrated in-memory database.
///
/// Limited to a single connection, since every in-memory connection would
/// otherwise see a database of its own.
pub async fn setup_in_memory_database() -> anyhow::Result<SqlitePool> {
    setup_database("sqlite::memory:", 1).await
}
