//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::rating::model::{InsertOutcome, RatingRecord, RatingStats};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: RFC 3339, whole seconds, `Z` suffix.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_rating(row: &libsql::Row) -> Result<RatingRecord, libsql::Error> {
    let user_id: String = row.get(0)?;
    let rating: i64 = row.get(1)?;
    let ts: String = row.get(2)?;
    Ok(RatingRecord {
        user_id,
        rating: rating.clamp(0, u8::MAX as i64) as u8,
        timestamp: parse_datetime(&ts),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_rating(&self, record: &RatingRecord) -> Result<InsertOutcome, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "INSERT INTO rating (user_id, rating, ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO NOTHING",
                params![
                    record.user_id.as_str(),
                    record.rating as i64,
                    format_datetime(&record.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rating: {e}")))?;

        let outcome = if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        };
        debug!(user_id = %record.user_id, rating = record.rating, ?outcome, "Rating insert");
        Ok(outcome)
    }

    async fn get_rating(&self, user_id: &str) -> Result<Option<RatingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, rating, ts FROM rating WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rating: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_rating(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_rating row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rating: {e}"))),
        }
    }

    async fn rating_stats(&self) -> Result<RatingStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT AVG(rating), COUNT(DISTINCT ts), MAX(ts) FROM rating",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("rating_stats: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let average: Option<f64> = row.get(0).ok();
                let reviews: i64 = row.get(1).unwrap_or(0);
                let last_review: Option<String> = row.get(2).ok();
                Ok(RatingStats {
                    average,
                    reviews: reviews.max(0) as u64,
                    last_review: last_review.as_deref().map(parse_datetime),
                })
            }
            Ok(None) => Ok(RatingStats::default()),
            Err(e) => Err(DatabaseError::Query(format!("rating_stats: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn record_at(user: &str, rating: u8, secs: i64) -> RatingRecord {
        RatingRecord {
            user_id: user.to_string(),
            rating,
            timestamp: Utc.timestamp_opt(1_710_928_800 + secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_rating() {
        let db = test_db().await;
        let record = record_at("42", 5, 0);

        let outcome = db.insert_rating(&record).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let fetched = db.get_rating("42").await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn get_rating_not_found() {
        let db = test_db().await;
        assert!(db.get_rating("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_insert_is_duplicate_and_keeps_first() {
        let db = test_db().await;
        let first = record_at("42", 5, 0);
        let second = record_at("42", 1, 60);

        db.insert_rating(&first).await.unwrap();
        let outcome = db.insert_rating(&second).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);

        let fetched = db.get_rating("42").await.unwrap().unwrap();
        assert_eq!(fetched.rating, 5);
        assert_eq!(fetched.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn stats_on_empty_table() {
        let db = test_db().await;
        let stats = db.rating_stats().await.unwrap();
        assert_eq!(stats, RatingStats::default());
    }

    #[tokio::test]
    async fn stats_aggregate_ratings() {
        let db = test_db().await;
        db.insert_rating(&record_at("a", 5, 0)).await.unwrap();
        db.insert_rating(&record_at("b", 4, 10)).await.unwrap();
        db.insert_rating(&record_at("c", 3, 20)).await.unwrap();

        let stats = db.rating_stats().await.unwrap();
        assert!((stats.average.unwrap() - 4.0).abs() < f64::EPSILON);
        assert_eq!(stats.reviews, 3);
        assert_eq!(stats.last_review, Some(record_at("c", 3, 20).timestamp));
    }

    #[tokio::test]
    async fn stats_count_distinct_timestamps() {
        let db = test_db().await;
        db.insert_rating(&record_at("a", 5, 0)).await.unwrap();
        db.insert_rating(&record_at("b", 1, 0)).await.unwrap();

        let stats = db.rating_stats().await.unwrap();
        assert_eq!(stats.reviews, 1);
        assert!((stats.average.unwrap() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn ratings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rating.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_rating(&record_at("42", 2, 0)).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let fetched = db.get_rating("42").await.unwrap().unwrap();
        assert_eq!(fetched.rating, 2);
        assert_eq!(
            db.insert_rating(&record_at("42", 5, 30)).await.unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn parse_datetime_accepts_both_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 20, 10, 0, 0).unwrap();
        assert_eq!(parse_datetime("2024-03-20T10:00:00Z"), expected);
        assert_eq!(parse_datetime("2024-03-20 10:00:00"), expected);
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
        assert_eq!(format_datetime(&expected), "2024-03-20T10:00:00Z");
    }
}
