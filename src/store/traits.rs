//! `Database` trait — async interface for rating persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::rating::model::{InsertOutcome, RatingRecord, RatingStats};

/// Backend-agnostic persistence used by the rating ledger.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create or upgrade the schema.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Insert a rating unless one already exists for the user.
    ///
    /// The uniqueness check and the write are one statement.
    async fn insert_rating(&self, record: &RatingRecord) -> Result<InsertOutcome, DatabaseError>;

    /// Fetch a user's rating.
    async fn get_rating(&self, user_id: &str) -> Result<Option<RatingRecord>, DatabaseError>;

    /// Average rating, distinct review count, and latest review time.
    async fn rating_stats(&self) -> Result<RatingStats, DatabaseError>;
}
