//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a legacy rating DB (a `rating` table keyed by
//! `client_id`, no `_migrations` table), the old rows are carried over into
//! the new schema.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "rating_ledger",
    sql: r#"
        CREATE TABLE IF NOT EXISTS rating (
            user_id TEXT PRIMARY KEY NOT NULL,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            ts TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rating_ts ON rating(ts);
    "#,
}];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    // Legacy DB: move the old table aside so V1 can create the new layout.
    let legacy = current_version == 0 && legacy_table_exists(conn).await?;
    if legacy {
        conn.execute("ALTER TABLE rating RENAME TO rating_legacy", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to rename legacy table: {e}")))?;
        tracing::info!("Legacy rating table detected, renamed to rating_legacy");
    }

    // Apply pending migrations
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if legacy {
        let copied = conn
            .execute(
                "INSERT OR IGNORE INTO rating (user_id, rating, ts)
                 SELECT CAST(client_id AS TEXT), rating, strftime('%Y-%m-%dT%H:%M:%SZ', ts)
                 FROM rating_legacy
                 WHERE rating BETWEEN 1 AND 5 AND strftime('%Y-%m-%dT%H:%M:%SZ', ts) IS NOT NULL",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to copy legacy ratings: {e}")))?;
        tracing::info!(rows = copied, "Copied legacy ratings");
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check for a pre-migration `rating` table (keyed by `client_id`).
async fn legacy_table_exists(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM pragma_table_info('rating') WHERE name = 'client_id'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy table: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn count(conn: &Connection, sql: &str) -> i64 {
        let mut rows = conn.query(sql, ()).await.unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test]
    async fn migrations_create_rating_table() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='rating'").await,
            1
        );
        assert_eq!(get_current_version(&conn).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM _migrations").await, 1);
    }

    #[tokio::test]
    async fn rating_range_is_enforced_by_schema() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        let result = conn
            .execute(
                "INSERT INTO rating (user_id, rating, ts) VALUES ('u', 6, '2024-01-01T00:00:00Z')",
                (),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn legacy_ratings_are_carried_over() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE rating(client_id INTEGER primary key unique, rating INTEGER, ts DATETIME);
             INSERT INTO rating VALUES (123, 5, '2024-03-20 10:00:00');
             INSERT INTO rating VALUES (456, 2, '2024-03-21 11:30:00');",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM rating").await, 2);
        let mut rows = conn
            .query("SELECT rating, ts FROM rating WHERE user_id = '123'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 5);
        assert_eq!(row.get::<String>(1).unwrap(), "2024-03-20T10:00:00Z");

        // A second run does not import again.
        run_migrations(&conn).await.unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM rating").await, 2);
    }
}
