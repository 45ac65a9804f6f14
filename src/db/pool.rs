use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Open (creating if missing) the SQLite database and apply migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Multi-connection WAL database in a fresh temp file, created through
/// [`connect`]. Remove it with [`remove_file_db`].
#[cfg(test)]
pub async fn file_pool(name: &str) -> (SqlitePool, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "spread-scanner-{name}-{}-{}.db",
        std::process::id(),
        crate::types::now_ns()
    ));
    let pool = connect(&path.to_string_lossy())
        .await
        .expect("file-backed sqlite");
    (pool, path)
}

#[cfg(test)]
pub async fn remove_file_db(pool: SqlitePool, path: &std::path::Path) {
    pool.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

/// Single-connection in-memory database with the schema applied.
/// The connection is pinned for the pool's lifetime; a second connection
/// would see a different, empty database.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}
