//! Rating data models.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Lowest accepted rating.
pub const MIN_RATING: u8 = 1;
/// Highest accepted rating.
pub const MAX_RATING: u8 = 5;

const STAR: &str = "⭐️";

/// One user's rating. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: String,
    pub rating: u8,
    /// Whole seconds; that is the precision stored.
    pub timestamp: DateTime<Utc>,
}

impl RatingRecord {
    pub fn new(user_id: &str, rating: u8) -> Self {
        Self {
            user_id: user_id.to_string(),
            rating,
            timestamp: Utc::now().trunc_subsecs(0),
        }
    }

    /// The rating as a row of stars.
    pub fn stars(&self) -> String {
        stars(self.rating)
    }
}

/// Render a rating as repeated star glyphs.
pub fn stars(rating: u8) -> String {
    STAR.repeat(rating as usize)
}

/// Result of a rating submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The rating was stored.
    Accepted(RatingRecord),
    /// The user had already rated; carries the stored (first) rating.
    Conflict(RatingRecord),
}

/// Result of a constrained insert at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row for this user already existed; nothing was written.
    Duplicate,
}

/// Aggregate view over all ratings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    /// Mean rating, `None` when nothing has been rated yet.
    pub average: Option<f64>,
    /// Number of distinct rating timestamps.
    pub reviews: u64,
    pub last_review: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stars_repeat_per_point() {
        assert_eq!(stars(1), "⭐️");
        assert_eq!(stars(3), "⭐️⭐️⭐️");
        assert_eq!(RatingRecord::new("u", 5).stars(), "⭐️".repeat(5));
    }

    #[test]
    fn new_record_has_whole_second_timestamp() {
        let record = RatingRecord::new("u", 4);
        assert_eq!(record.timestamp.timestamp_subsec_nanos(), 0);
        assert_eq!(record.user_id, "u");
        assert_eq!(record.rating, 4);
    }

    #[test]
    fn empty_stats_default() {
        let stats = RatingStats::default();
        assert!(stats.average.is_none());
        assert_eq!(stats.reviews, 0);
        assert!(stats.last_review.is_none());
    }
}
