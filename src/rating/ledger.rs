//! Single-vote rating ledger.
//!
//! Each user may rate once. The first write wins; later attempts read back
//! the stored rating instead of overwriting it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{DatabaseError, RatingError};
use crate::rating::model::{
    InsertOutcome, MAX_RATING, MIN_RATING, RatingRecord, RatingStats, SubmitOutcome,
};
use crate::store::Database;

/// First-write-wins store of one rating per user.
pub struct RatingLedger {
    store: Arc<dyn Database>,
}

impl RatingLedger {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Record a rating for a user.
    ///
    /// Returns `Conflict` carrying the stored rating when the user has
    /// already rated. Nothing is written in that case.
    pub async fn submit(&self, user_id: &str, rating: i64) -> Result<SubmitOutcome, RatingError> {
        if !(MIN_RATING as i64..=MAX_RATING as i64).contains(&rating) {
            return Err(RatingError::InvalidRating(rating));
        }

        let record = RatingRecord::new(user_id, rating as u8);
        match self.store.insert_rating(&record).await? {
            InsertOutcome::Inserted => {
                info!(user_id, rating, "Rating accepted");
                Ok(SubmitOutcome::Accepted(record))
            }
            InsertOutcome::Duplicate => {
                let existing = self.store.get_rating(user_id).await?.ok_or_else(|| {
                    DatabaseError::Query(format!("rating for {user_id} missing after conflict"))
                })?;
                warn!(
                    user_id,
                    rating,
                    existing = existing.rating,
                    "Repeat rating rejected"
                );
                Ok(SubmitOutcome::Conflict(existing))
            }
        }
    }

    /// The user's stored rating, if any.
    pub async fn get_rating(&self, user_id: &str) -> Result<Option<RatingRecord>, RatingError> {
        Ok(self.store.get_rating(user_id).await?)
    }

    /// Aggregate statistics over all ratings.
    pub async fn stats(&self) -> Result<RatingStats, RatingError> {
        Ok(self.store.rating_stats().await?)
    }
}
