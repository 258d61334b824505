//! Dispatcher — the bot's main loop.
//!
//! Consumes the merged channel stream, parses commands, feeds answers to
//! the collection engine, calls the predictor on completion and routes
//! rating presses to the ledger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bot::command::{Command, CommandParser};
use crate::bot::replies;
use crate::channels::{ChannelManager, IncomingMessage, Keyboard, MessageKind, OutgoingResponse, ParseMode};
use crate::collection::{CarRecord, CollectionEngine, Outcome, spawn_pruning_task};
use crate::error::{Error, InferenceError, RatingError};
use crate::predictor::PricePredictor;
use crate::rating::{RatingLedger, SubmitOutcome};

/// Name used for batch uploads that arrive without one.
const DEFAULT_UPLOAD_NAME: &str = "items.csv";

/// Shared services the dispatcher works with.
pub struct BotDeps {
    pub engine: Arc<CollectionEngine>,
    pub ledger: Arc<RatingLedger>,
    pub predictor: Arc<dyn PricePredictor>,
    /// Predicted prices below this are reported as this value.
    pub min_price: Decimal,
    pub session_idle_timeout: Duration,
}

/// Routes every inbound message to the right component.
pub struct Dispatcher {
    deps: BotDeps,
    channels: Arc<ChannelManager>,
    /// Users whose next document is a batch upload.
    batch_users: RwLock<HashSet<String>>,
    started_at: DateTime<Utc>,
}

impl Dispatcher {
    pub fn new(deps: BotDeps, channels: ChannelManager) -> Self {
        Self {
            deps,
            channels: Arc::new(channels),
            batch_users: RwLock::new(HashSet::new()),
            started_at: Utc::now(),
        }
    }

    // ── Main loop ───────────────────────────────────────────────────

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let mut message_stream = self.channels.start_all().await?;

        let pruning_handle = spawn_pruning_task(
            Arc::clone(self.deps.engine.sessions()),
            self.deps.session_idle_timeout,
        );

        info!(channels = ?self.channels.names(), "Bot ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.handle_message(&message).await;
        }

        info!("Bot shutting down...");
        pruning_handle.abort();
        self.channels.shutdown_all().await?;

        Ok(())
    }

    // ── Message dispatch ────────────────────────────────────────────

    /// Handle one inbound message to completion, sending every reply.
    pub async fn handle_message(&self, message: &IncomingMessage) {
        debug!(
            channel = %message.channel,
            user_id = %message.user_id,
            kind = ?message.kind,
            "Inbound message"
        );

        match &message.kind {
            MessageKind::Text(text) => self.handle_text(message, text).await,
            MessageKind::Document { file_id, file_name } => {
                self.handle_document(message, file_id, file_name.as_deref())
                    .await
            }
            MessageKind::Callback { data, .. } => self.handle_callback(message, data).await,
        }
    }

    async fn reply(&self, message: &IncomingMessage, response: OutgoingResponse) {
        if let Err(e) = self.channels.respond(message, response).await {
            warn!(user_id = %message.user_id, "Failed to send reply: {e}");
        }
    }

    async fn reply_error(&self, message: &IncomingMessage, err: &dyn std::fmt::Display) {
        self.reply(message, OutgoingResponse::text(err.to_string()))
            .await;
        self.reply(message, OutgoingResponse::text(replies::RESTART_HINT))
            .await;
    }

    async fn handle_text(&self, message: &IncomingMessage, text: &str) {
        let user_id = message.user_id.as_str();

        match CommandParser::parse(text) {
            Command::Start => {
                self.deps.engine.reset(user_id).await;
                self.batch_users.write().await.remove(user_id);
                self.reply(
                    message,
                    OutgoingResponse::text(replies::WELCOME).with_keyboard(replies::menu_keyboard()),
                )
                .await;
            }
            Command::HelpCommand => {
                self.reply(
                    message,
                    OutgoingResponse::text(replies::HELP_COMMAND).with_parse_mode(ParseMode::Markdown),
                )
                .await;
            }
            Command::Help => {
                self.reply(
                    message,
                    OutgoingResponse::text(replies::HELP_MENU).with_parse_mode(ParseMode::Markdown),
                )
                .await;
            }
            Command::Info => {
                self.reply(
                    message,
                    OutgoingResponse::text(replies::info_text(&self.started_at))
                        .with_parse_mode(ParseMode::Markdown),
                )
                .await;
            }
            Command::Rating => {
                let response = match self.deps.ledger.stats().await {
                    Ok(stats) => OutgoingResponse::text(replies::stats_text(&stats))
                        .with_parse_mode(ParseMode::Html),
                    Err(e) => {
                        error!("Failed to load rating stats: {e}");
                        OutgoingResponse::text(replies::STATS_UNAVAILABLE)
                    }
                };
                self.reply(message, response).await;
            }
            Command::SinglePrediction => {
                self.batch_users.write().await.remove(user_id);
                let outcome = self.deps.engine.start(user_id).await;
                self.reply(message, prompt_response(&outcome)).await;
            }
            Command::BatchPrediction => {
                self.deps.engine.reset(user_id).await;
                self.batch_users.write().await.insert(user_id.to_string());
                self.reply(
                    message,
                    OutgoingResponse::text(replies::ATTACH_CSV).with_keyboard(Keyboard::Remove),
                )
                .await;
            }
            Command::Text(text) => match self.deps.engine.handle_input(user_id, &text).await {
                Ok(Some(Outcome::Complete(record))) => self.predict(message, &record).await,
                Ok(Some(outcome)) => self.reply(message, prompt_response(&outcome)).await,
                Ok(None) => {
                    self.reply(message, OutgoingResponse::text(replies::UNKNOWN))
                        .await
                }
                Err(e) => {
                    error!(user_id, "Completed record could not be assembled: {e}");
                    self.reply_error(message, &e).await;
                }
            },
        }
    }

    /// Price a completed record and offer the rating keyboard.
    async fn predict(&self, message: &IncomingMessage, record: &CarRecord) {
        self.reply(message, OutgoingResponse::text(replies::GATHERED))
            .await;

        let priced = self
            .deps
            .predictor
            .predict(record)
            .await
            .and_then(|price| {
                replies::format_price(price, self.deps.min_price).ok_or_else(|| {
                    InferenceError::InvalidResponse(format!("price {price} is not representable"))
                })
            });

        match priced {
            Ok(formatted) => {
                info!(user_id = %message.user_id, price = %formatted, "Price predicted");
                self.reply(
                    message,
                    OutgoingResponse::text(replies::price_text(&formatted))
                        .with_parse_mode(ParseMode::Html),
                )
                .await;
                self.reply(
                    message,
                    OutgoingResponse::text(replies::RATE_PROMPT)
                        .with_keyboard(replies::rating_keyboard()),
                )
                .await;
            }
            Err(e) => {
                error!(user_id = %message.user_id, "Prediction failed: {e}");
                self.deps.engine.reset(&message.user_id).await;
                self.reply_error(message, &e).await;
            }
        }
    }

    async fn handle_document(
        &self,
        message: &IncomingMessage,
        file_id: &str,
        file_name: Option<&str>,
    ) {
        let user_id = message.user_id.as_str();
        if !self.batch_users.write().await.remove(user_id) {
            debug!(user_id, "Document received outside batch mode");
            self.reply(message, OutgoingResponse::text(replies::UNKNOWN))
                .await;
            return;
        }

        let csv = match self.channels.download(message, file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(user_id, "Batch upload download failed: {e}");
                self.reply_error(message, &e).await;
                return;
            }
        };

        let name = file_name.unwrap_or(DEFAULT_UPLOAD_NAME);
        match self.deps.predictor.predict_batch(name, csv).await {
            Ok(result) => {
                info!(user_id, file_name = name, "Batch prediction complete");
                self.reply(
                    message,
                    OutgoingResponse::document(replies::BATCH_RESULT_NAME, result),
                )
                .await;
            }
            Err(e) => {
                error!(user_id, "Batch prediction failed: {e}");
                self.reply_error(message, &e).await;
            }
        }
    }

    async fn handle_callback(&self, message: &IncomingMessage, data: &str) {
        let user_id = message.user_id.as_str();
        let Ok(rating) = data.parse::<i64>() else {
            debug!(user_id, data, "Ignoring unknown callback");
            self.reply(message, OutgoingResponse::acknowledge()).await;
            return;
        };

        let response = match self.deps.ledger.submit(user_id, rating).await {
            Ok(SubmitOutcome::Accepted(_)) => OutgoingResponse::alert(replies::REVIEW_REGISTERED),
            Ok(SubmitOutcome::Conflict(existing)) => {
                OutgoingResponse::alert(replies::already_rated_text(&existing))
            }
            Err(RatingError::InvalidRating(r)) => {
                debug!(user_id, rating = r, "Ignoring out-of-range rating");
                self.reply(message, OutgoingResponse::acknowledge()).await;
                return;
            }
            Err(RatingError::Storage(e)) => {
                error!(user_id, "Rating storage failed: {e}");
                OutgoingResponse::alert(replies::REVIEW_FAILED)
            }
        };

        self.deps.engine.release_rating(user_id).await;
        self.reply(message, response).await;
    }
}

/// The reply for an `Advance` or `Reprompt`: prompt text plus the field's
/// choice keyboard, or no keyboard for free-text fields.
fn prompt_response(outcome: &Outcome) -> OutgoingResponse {
    let keyboard = match outcome.choices() {
        Some(choices) => Keyboard::row(choices),
        None => Keyboard::Remove,
    };
    OutgoingResponse::text(outcome.reply_text().unwrap_or_default()).with_keyboard(keyboard)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::channels::test_support::StubChannel;
    use crate::collection::{Cursor, FieldTable, SessionStore};
    use crate::error::DatabaseError;
    use crate::rating::model::{InsertOutcome, RatingRecord, RatingStats};
    use crate::store::{Database, LibSqlBackend};

    const VALID_ANSWERS: [&str; 11] = [
        "1",
        "2019",
        "10000",
        "Diesel",
        "Individual",
        "Manual",
        "First Owner",
        "7.9",
        "1598",
        "132.2",
        "5",
    ];

    struct FixedPredictor {
        price: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PricePredictor for FixedPredictor {
        async fn predict(&self, record: &CarRecord) -> Result<f64, InferenceError> {
            assert_eq!(record.name, "Ambassador");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.price)
        }

        async fn predict_batch(
            &self,
            file_name: &str,
            csv: Vec<u8>,
        ) -> Result<Vec<u8>, InferenceError> {
            let mut out = format!("# {file_name}\n").into_bytes();
            out.extend(csv);
            Ok(out)
        }
    }

    struct DownPredictor;

    #[async_trait]
    impl PricePredictor for DownPredictor {
        async fn predict(&self, _record: &CarRecord) -> Result<f64, InferenceError> {
            Err(InferenceError::RequestFailed("connection refused".into()))
        }

        async fn predict_batch(
            &self,
            _file_name: &str,
            _csv: Vec<u8>,
        ) -> Result<Vec<u8>, InferenceError> {
            Err(InferenceError::Timeout(Duration::from_secs(30)))
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl Database for OfflineStore {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn insert_rating(&self, _record: &RatingRecord) -> Result<InsertOutcome, DatabaseError> {
            Err(DatabaseError::Pool("database is locked".into()))
        }

        async fn get_rating(&self, _user_id: &str) -> Result<Option<RatingRecord>, DatabaseError> {
            Err(DatabaseError::Pool("database is locked".into()))
        }

        async fn rating_stats(&self) -> Result<RatingStats, DatabaseError> {
            Err(DatabaseError::Pool("database is locked".into()))
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        sent: Arc<Mutex<Vec<OutgoingResponse>>>,
        engine: Arc<CollectionEngine>,
        ledger: Arc<RatingLedger>,
    }

    impl Harness {
        async fn new(predictor: Arc<dyn PricePredictor>) -> Self {
            let db = LibSqlBackend::new_memory().await.unwrap();
            Self::with_store(predictor, Arc::new(db))
        }

        fn with_store(predictor: Arc<dyn PricePredictor>, store: Arc<dyn Database>) -> Self {
            let stub = StubChannel::new("test").with_file("file-1", b"name,year\nAudi,2015\n".to_vec());
            let sent = stub.sent();
            let mut channels = ChannelManager::new();
            channels.add(Box::new(stub));

            let engine = Arc::new(CollectionEngine::new(
                FieldTable::car_attributes(),
                Arc::new(SessionStore::new()),
            ));
            let ledger = Arc::new(RatingLedger::new(store));

            let deps = BotDeps {
                engine: Arc::clone(&engine),
                ledger: Arc::clone(&ledger),
                predictor,
                min_price: dec!(50000),
                session_idle_timeout: Duration::from_secs(3600),
            };

            Self {
                dispatcher: Dispatcher::new(deps, channels),
                sent,
                engine,
                ledger,
            }
        }

        async fn send(&self, message: IncomingMessage) -> Vec<OutgoingResponse> {
            self.sent.lock().unwrap().clear();
            self.dispatcher.handle_message(&message).await;
            self.sent.lock().unwrap().clone()
        }

        async fn text(&self, user: &str, text: &str) -> Vec<OutgoingResponse> {
            self.send(IncomingMessage::new("test", user, text)).await
        }

        async fn rate(&self, user: &str, data: &str) -> Vec<OutgoingResponse> {
            self.send(IncomingMessage::callback("test", user, data, "cb"))
                .await
        }

        async fn complete_collection(&self, user: &str) -> Vec<OutgoingResponse> {
            self.text(user, replies::MENU_SINGLE).await;
            for answer in &VALID_ANSWERS[..10] {
                self.text(user, answer).await;
            }
            self.text(user, VALID_ANSWERS[10]).await
        }
    }

    fn fixed(price: f64) -> Arc<FixedPredictor> {
        Arc::new(FixedPredictor {
            price,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn start_shows_menu() {
        let h = Harness::new(fixed(1.0)).await;
        let sent = h.text("u1", "/start").await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, replies::WELCOME);
        assert_eq!(sent[0].keyboard, replies::menu_keyboard());
    }

    #[tokio::test]
    async fn single_prediction_prompts_for_brand() {
        let h = Harness::new(fixed(1.0)).await;
        let sent = h.text("u1", replies::MENU_SINGLE).await;
        assert!(sent[0].content.starts_with("Choose Brand:"));
        assert_eq!(sent[0].keyboard, Keyboard::Remove);
        assert_eq!(h.engine.cursor("u1").await, Cursor::Field(0));
    }

    #[tokio::test]
    async fn choice_fields_show_their_keyboard() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("u1", replies::MENU_SINGLE).await;
        h.text("u1", "1").await;
        h.text("u1", "2019").await;
        let sent = h.text("u1", "10000").await;
        assert_eq!(
            sent[0].keyboard,
            Keyboard::row(&["Diesel", "Petrol", "LPG", "CNG"])
        );

        // A rejected choice re-shows the same keyboard.
        let sent = h.text("u1", "diesel").await;
        assert_eq!(
            sent[0].keyboard,
            Keyboard::row(&["Diesel", "Petrol", "LPG", "CNG"])
        );
        assert_eq!(h.engine.cursor("u1").await, Cursor::Field(3));
    }

    #[tokio::test]
    async fn invalid_answer_reprompts() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("u1", replies::MENU_SINGLE).await;
        h.text("u1", "1").await;
        let sent = h.text("u1", "1800").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].content.starts_with("Entered year is incorrect."));
        assert_eq!(h.engine.cursor("u1").await, Cursor::Field(1));
    }

    #[tokio::test]
    async fn full_walk_predicts_and_offers_rating() {
        let predictor = fixed(1_234_567.5);
        let h = Harness::new(predictor.clone()).await;

        let sent = h.complete_collection("u1").await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content, replies::GATHERED);
        assert_eq!(sent[1].content, "Predicted price is <b>1 234 567.5</b> RUB");
        assert_eq!(sent[1].parse_mode, Some(ParseMode::Html));
        assert_eq!(sent[2].content, replies::RATE_PROMPT);
        assert_eq!(sent[2].keyboard, replies::rating_keyboard());

        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.cursor("u1").await, Cursor::AwaitingRating);
    }

    #[tokio::test]
    async fn low_prices_are_floored() {
        let h = Harness::new(fixed(1234.0)).await;
        let sent = h.complete_collection("u1").await;
        assert_eq!(sent[1].content, "Predicted price is <b>50 000</b> RUB");
    }

    #[tokio::test]
    async fn prediction_failure_resets_session() {
        let h = Harness::new(Arc::new(DownPredictor)).await;
        let sent = h.complete_collection("u1").await;

        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content, replies::GATHERED);
        assert!(sent[1].content.contains("connection refused"));
        assert_eq!(sent[2].content, replies::RESTART_HINT);
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);
    }

    #[tokio::test]
    async fn non_finite_price_is_an_inference_error() {
        let h = Harness::new(fixed(f64::NAN)).await;
        let sent = h.complete_collection("u1").await;
        assert_eq!(sent[2].content, replies::RESTART_HINT);
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);
    }

    #[tokio::test]
    async fn rating_after_prediction_registers_then_conflicts() {
        let h = Harness::new(fixed(100_000.0)).await;
        h.complete_collection("u1").await;

        let sent = h.rate("u1", "5").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].alert);
        assert_eq!(sent[0].content, replies::REVIEW_REGISTERED);
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);

        let sent = h.rate("u1", "3").await;
        assert!(sent[0].alert);
        assert!(sent[0].content.starts_with("You have already rated this Bot at "));
        assert!(sent[0].content.ends_with("Your last review was ⭐️⭐️⭐️⭐️⭐️"));

        let stored = h.ledger.get_rating("u1").await.unwrap().unwrap();
        assert_eq!(stored.rating, 5);
    }

    #[tokio::test]
    async fn conflict_also_releases_awaiting_rating() {
        let h = Harness::new(fixed(100_000.0)).await;
        h.rate("u1", "4").await;

        h.complete_collection("u1").await;
        assert_eq!(h.engine.cursor("u1").await, Cursor::AwaitingRating);

        let sent = h.rate("u1", "2").await;
        assert!(sent[0].content.contains("already rated"));
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);
    }

    #[tokio::test]
    async fn unknown_callbacks_are_acknowledged_silently() {
        let h = Harness::new(fixed(1.0)).await;
        h.complete_collection("u1").await;

        for data in ["9", "0", "abc"] {
            let sent = h.rate("u1", data).await;
            assert_eq!(sent.len(), 1, "{data} should be acknowledged");
            assert!(!sent[0].alert);
            assert!(sent[0].is_empty());
        }
        assert!(h.ledger.get_rating("u1").await.unwrap().is_none());
        assert_eq!(h.engine.cursor("u1").await, Cursor::AwaitingRating);
    }

    #[tokio::test]
    async fn rating_storage_failure_alerts_and_releases_session() {
        let h = Harness::with_store(fixed(100_000.0), Arc::new(OfflineStore));
        h.complete_collection("u1").await;
        assert_eq!(h.engine.cursor("u1").await, Cursor::AwaitingRating);

        let sent = h.rate("u1", "5").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].alert);
        assert_eq!(sent[0].content, replies::REVIEW_FAILED);
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);
    }

    #[tokio::test]
    async fn rating_command_reports_unavailable_stats() {
        let h = Harness::with_store(fixed(1.0), Arc::new(OfflineStore));
        let sent = h.text("u1", replies::MENU_RATING).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, replies::STATS_UNAVAILABLE);
        assert!(sent[0].parse_mode.is_none());
    }

    #[tokio::test]
    async fn text_while_idle_is_unknown() {
        let h = Harness::new(fixed(1.0)).await;
        let sent = h.text("u1", "hello").await;
        assert_eq!(sent[0].content, replies::UNKNOWN);
    }

    #[tokio::test]
    async fn text_while_awaiting_rating_is_unknown() {
        let h = Harness::new(fixed(100_000.0)).await;
        h.complete_collection("u1").await;
        let sent = h.text("u1", "5").await;
        assert_eq!(sent[0].content, replies::UNKNOWN);
        assert_eq!(h.engine.cursor("u1").await, Cursor::AwaitingRating);
    }

    #[tokio::test]
    async fn menu_commands_work_mid_collection() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("u1", replies::MENU_SINGLE).await;
        h.text("u1", "1").await;

        let sent = h.text("u1", replies::MENU_RATING).await;
        assert!(sent[0].content.contains("<b>Statistics</b>"));
        assert_eq!(sent[0].parse_mode, Some(ParseMode::Html));
        // Collection is untouched.
        assert_eq!(h.engine.cursor("u1").await, Cursor::Field(1));

        h.text("u1", "/start").await;
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);
    }

    #[tokio::test]
    async fn help_and_info_use_markdown() {
        let h = Harness::new(fixed(1.0)).await;
        let sent = h.text("u1", "/help").await;
        assert_eq!(sent[0].content, replies::HELP_COMMAND);
        assert_eq!(sent[0].parse_mode, Some(ParseMode::Markdown));

        let sent = h.text("u1", replies::MENU_HELP).await;
        assert_eq!(sent[0].content, replies::HELP_MENU);

        let sent = h.text("u1", replies::MENU_INFO).await;
        assert!(sent[0].content.contains("Bot started at"));
    }

    #[tokio::test]
    async fn batch_prediction_returns_result_csv() {
        let h = Harness::new(fixed(1.0)).await;
        let sent = h.text("u1", replies::MENU_BATCH).await;
        assert_eq!(sent[0].content, replies::ATTACH_CSV);
        assert_eq!(sent[0].keyboard, Keyboard::Remove);

        let sent = h
            .send(IncomingMessage::document("test", "u1", "file-1", Some("cars.csv")))
            .await;
        assert_eq!(sent.len(), 1);
        let doc = sent[0].document.as_ref().unwrap();
        assert_eq!(doc.file_name, "result.csv");
        assert_eq!(doc.bytes, b"# cars.csv\nname,year\nAudi,2015\n");

        // Batch mode ends after one file.
        let sent = h
            .send(IncomingMessage::document("test", "u1", "file-1", Some("cars.csv")))
            .await;
        assert_eq!(sent[0].content, replies::UNKNOWN);
    }

    #[tokio::test]
    async fn batch_download_failure_reports_error() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("u1", replies::MENU_BATCH).await;
        let sent = h
            .send(IncomingMessage::document("test", "u1", "missing", None))
            .await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].content.contains("missing"));
        assert_eq!(sent[1].content, replies::RESTART_HINT);
    }

    #[tokio::test]
    async fn batch_prediction_failure_reports_error() {
        let h = Harness::new(Arc::new(DownPredictor)).await;
        h.text("u1", replies::MENU_BATCH).await;
        let sent = h
            .send(IncomingMessage::document("test", "u1", "file-1", None))
            .await;
        assert!(sent[0].content.contains("timed out"));
        assert_eq!(sent[1].content, replies::RESTART_HINT);
    }

    #[tokio::test]
    async fn batch_mode_cancels_collection() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("u1", replies::MENU_SINGLE).await;
        h.text("u1", replies::MENU_BATCH).await;
        assert_eq!(h.engine.cursor("u1").await, Cursor::Idle);

        // And starting collection leaves batch mode.
        h.text("u1", replies::MENU_SINGLE).await;
        let sent = h
            .send(IncomingMessage::document("test", "u1", "file-1", None))
            .await;
        assert_eq!(sent[0].content, replies::UNKNOWN);
    }

    #[tokio::test]
    async fn users_do_not_share_sessions() {
        let h = Harness::new(fixed(1.0)).await;
        h.text("alice", replies::MENU_SINGLE).await;
        let sent = h.text("bob", "1").await;
        assert_eq!(sent[0].content, replies::UNKNOWN);
        assert_eq!(h.engine.cursor("alice").await, Cursor::Field(0));
    }

    #[tokio::test]
    async fn run_drains_channel_stream_and_exits() {
        let mut inbound = vec![
            IncomingMessage::new("test", "u1", "/start"),
            IncomingMessage::new("test", "u1", replies::MENU_SINGLE),
        ];
        inbound.extend(
            VALID_ANSWERS
                .iter()
                .map(|a| IncomingMessage::new("test", "u1", a)),
        );
        inbound.push(IncomingMessage::callback("test", "u1", "4", "cb"));

        let stub = StubChannel::new("test").with_inbound(inbound);
        let sent = stub.sent();
        let mut channels = ChannelManager::new();
        channels.add(Box::new(stub));

        let db = LibSqlBackend::new_memory().await.unwrap();
        let ledger = Arc::new(RatingLedger::new(Arc::new(db)));
        let deps = BotDeps {
            engine: Arc::new(CollectionEngine::new(
                FieldTable::car_attributes(),
                Arc::new(SessionStore::new()),
            )),
            ledger: Arc::clone(&ledger),
            predictor: fixed(700_000.0),
            min_price: dec!(50000),
            session_idle_timeout: Duration::from_secs(3600),
        };

        Dispatcher::new(deps, channels).run().await.unwrap();

        let sent = sent.lock().unwrap();
        let last = sent.last().unwrap();
        assert!(last.alert);
        assert_eq!(last.content, replies::REVIEW_REGISTERED);
        assert!(
            sent.iter()
                .any(|r| r.content == "Predicted price is <b>700 000.0</b> RUB")
        );
        drop(sent);

        assert_eq!(ledger.get_rating("u1").await.unwrap().unwrap().rating, 4);
    }
}
