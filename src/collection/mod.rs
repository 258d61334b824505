//! Guided data collection: the field-by-field conversation that builds a
//! car record.
//!
//! A user starts collection explicitly, then answers one field at a time.
//! Each answer is validated against the active field: accepted answers move
//! the cursor forward, rejected ones re-ask the same field. Accepting the
//! last field produces a [`CarRecord`] and parks the session in
//! `AwaitingRating` until the user rates (or resets).

pub mod engine;
pub mod fields;
pub mod record;
pub mod session;

pub use engine::{CollectionEngine, Outcome};
pub use fields::{FieldKey, FieldKind, FieldSpec, FieldTable, Prompt};
pub use record::CarRecord;
pub use session::{Cursor, Session, SessionStore, spawn_pruning_task};
