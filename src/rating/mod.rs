//! Rating ledger: one rating per user, with aggregate statistics.

pub mod ledger;
pub mod model;
pub mod routes;

pub use ledger::RatingLedger;
pub use model::{RatingRecord, RatingStats, SubmitOutcome, stars};
pub use routes::{RatingRouteState, rating_routes};
