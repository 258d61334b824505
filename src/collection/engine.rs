//! CollectionEngine — drives users through the field chain.

use std::sync::Arc;

use super::fields::{FieldKey, FieldTable, Next, Prompt};
use super::record::CarRecord;
use super::session::{Cursor, Session, SessionStore};
use crate::error::CollectionError;

/// What the engine decided about one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The answer was rejected; ask the same field again.
    Reprompt {
        field: FieldKey,
        notice: &'static str,
        prompt: Prompt,
    },
    /// The answer was accepted (or collection just started); ask the next
    /// field. `accepted` is `None` for the opening prompt.
    Advance {
        accepted: Option<FieldKey>,
        prompt: Prompt,
    },
    /// The last field was accepted; the record is ready for prediction.
    Complete(CarRecord),
}

impl Outcome {
    /// Text to send back to the user, if this outcome carries a prompt.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            Self::Reprompt { notice, prompt, .. } => Some(format!("{notice}\n\n{}", prompt.text)),
            Self::Advance { prompt, .. } => Some(prompt.text.clone()),
            Self::Complete(_) => None,
        }
    }

    /// Reply-keyboard choices to show alongside the reply.
    pub fn choices(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Reprompt { prompt, .. } | Self::Advance { prompt, .. } => prompt.choices,
            Self::Complete(_) => None,
        }
    }
}

/// Owns the session map and applies the field table to user input.
pub struct CollectionEngine {
    fields: FieldTable,
    sessions: Arc<SessionStore>,
}

impl CollectionEngine {
    pub fn new(fields: FieldTable, sessions: Arc<SessionStore>) -> Self {
        Self { fields, sessions }
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Begin (or restart) collection for a user and return the first prompt.
    pub async fn start(&self, user_id: &str) -> Outcome {
        let prompt = self
            .fields
            .first()
            .map(|f| f.prompt.clone())
            .unwrap_or_else(|| Prompt {
                text: String::new(),
                choices: None,
            });

        self.sessions
            .with_session(user_id, |session| {
                session.clear();
                if !self.fields.is_empty() {
                    session.cursor = Cursor::Field(0);
                }
            })
            .await;

        tracing::info!(user_id = %user_id, "Collection started");
        Outcome::Advance {
            accepted: None,
            prompt,
        }
    }

    /// Apply one user answer.
    ///
    /// Returns `Ok(None)` when the user is not collecting. A completed record
    /// that cannot be assembled resets the session and returns the error.
    pub async fn handle_input(
        &self,
        user_id: &str,
        raw_text: &str,
    ) -> Result<Option<Outcome>, CollectionError> {
        self.sessions
            .with_session(user_id, |session| self.step(session, raw_text))
            .await
    }

    fn step(&self, session: &mut Session, raw_text: &str) -> Result<Option<Outcome>, CollectionError> {
        let Cursor::Field(index) = session.cursor else {
            return Ok(None);
        };
        let Some(field) = self.fields.get(index) else {
            tracing::warn!(user_id = %session.user_id, index, "Cursor past end of field table");
            session.clear();
            return Ok(None);
        };

        let Some(value) = field.rule.resolve(raw_text) else {
            // Rejected answers are still recorded; a later valid answer
            // overwrites them.
            session.collected.insert(field.key, raw_text.to_string());
            tracing::debug!(user_id = %session.user_id, field = %field.key, "Answer rejected");
            return Ok(Some(Outcome::Reprompt {
                field: field.key,
                notice: field.notice,
                prompt: field.prompt.clone(),
            }));
        };

        session.collected.insert(field.key, value);
        tracing::debug!(user_id = %session.user_id, field = %field.key, "Answer accepted");

        match field.next {
            Next::Field(next_index) => {
                let Some(next) = self.fields.get(next_index) else {
                    session.clear();
                    return Ok(None);
                };
                session.cursor = Cursor::Field(next_index);
                Ok(Some(Outcome::Advance {
                    accepted: Some(field.key),
                    prompt: next.prompt.clone(),
                }))
            }
            Next::Terminal => {
                let record = CarRecord::from_collected(&session.collected);
                session.collected.clear();
                match record {
                    Ok(record) => {
                        session.cursor = Cursor::AwaitingRating;
                        tracing::info!(user_id = %session.user_id, brand = %record.name, "Collection complete");
                        Ok(Some(Outcome::Complete(record)))
                    }
                    Err(e) => {
                        session.cursor = Cursor::Idle;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Return a user to `Idle`, discarding collected values.
    pub async fn reset(&self, user_id: &str) {
        self.sessions.with_session(user_id, Session::clear).await;
    }

    /// Release a user waiting to rate. Returns whether the user was in
    /// `AwaitingRating`; any other state is left untouched.
    pub async fn release_rating(&self, user_id: &str) -> bool {
        self.sessions
            .with_session(user_id, |session| {
                if session.cursor == Cursor::AwaitingRating {
                    session.clear();
                    true
                } else {
                    false
                }
            })
            .await
    }

    pub async fn cursor(&self, user_id: &str) -> Cursor {
        self.sessions.cursor(user_id).await
    }
}
