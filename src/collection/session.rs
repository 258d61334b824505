//! Per-user collection sessions.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::fields::FieldKey;

/// Where a user currently is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "index")]
pub enum Cursor {
    /// Not collecting. Initial state, and the target of every reset.
    Idle,
    /// Waiting for an answer to the field at this position of the chain.
    Field(usize),
    /// A record was completed; the next rating attempt releases the session.
    AwaitingRating,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::Idle
    }
}

impl Cursor {
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::Field(_))
    }
}

/// One user's progress through the field chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub cursor: Cursor,
    /// Raw answers keyed by field; iteration order is chain order.
    pub collected: BTreeMap<FieldKey, String>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            cursor: Cursor::Idle,
            collected: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Drop collected values and return to `Idle`.
    pub fn clear(&mut self) {
        self.cursor = Cursor::Idle;
        self.collected.clear();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// In-memory session map, one entry per user.
///
/// Each operation holds the write lock for its whole read-modify-write, so
/// inputs for the same user never interleave inside the engine.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Run `f` against the user's session, creating an idle one if needed.
    pub async fn with_session<R>(&self, user_id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(user_id));
        session.touch();
        f(session)
    }

    /// Snapshot of a user's session, if one exists.
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Current cursor for a user (`Idle` when there is no session).
    pub async fn cursor(&self, user_id: &str) -> Cursor {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|s| s.cursor)
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove sessions idle for longer than `idle_timeout`. Returns how many
    /// were removed.
    pub async fn prune_stale(&self, idle_timeout: Duration) -> usize {
        let Ok(idle) = chrono::Duration::from_std(idle_timeout) else {
            return 0;
        };
        let cutoff = Utc::now() - idle;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|user_id, session| {
            let keep = session.last_activity > cutoff;
            if !keep {
                debug!(user_id = %user_id, cursor = ?session.cursor, "Pruning idle session");
            }
            keep
        });
        let pruned = before - sessions.len();

        if pruned > 0 {
            info!(count = pruned, "Pruned idle sessions");
        }
        pruned
    }
}

/// Spawn a background task that periodically prunes idle sessions.
pub fn spawn_pruning_task(
    store: std::sync::Arc<SessionStore>,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600)); // Every 10 min
        interval.tick().await; // Skip immediate first tick
        loop {
            interval.tick().await;
            store.prune_stale(idle_timeout).await;
        }
    })
}
