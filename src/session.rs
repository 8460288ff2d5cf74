//! Conversation session store
//!
//! Keyed, append-only turn history with FIFO eviction. Sessions are created
//! lazily on first append and live until explicitly cleared; the per-session
//! lock serializes writers for one session without blocking other sessions.

use crate::error::AppError;
use crate::guardian::GuardianVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// How a request ended, recorded on its Turn and surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Rejected,
    GenerationFailed,
    ExecutionFailed,
}

/// One question/answer exchange. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: Uuid,
    pub question: String,
    /// The SQL that was executed, or attempted when the request failed past
    /// generation. `None` when no SQL was ever produced.
    pub sql: Option<String>,
    /// Absent when the request never reached the Guardian
    pub verdict: Option<GuardianVerdict>,
    pub status: TurnStatus,
    /// Row count on success, error text otherwise
    pub summary: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        question: impl Into<String>,
        sql: Option<String>,
        verdict: Option<GuardianVerdict>,
        status: TurnStatus,
        summary: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            sql,
            verdict,
            status,
            summary: summary.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }
}

type SessionHandle = Arc<Mutex<VecDeque<Turn>>>;

/// Thread-safe conversation store.
///
/// The outer map lock is held only long enough to resolve a session handle,
/// so appends to different sessions proceed in parallel while appends to the
/// same session serialize on its own mutex.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_turns: max_turns.max(1),
        }
    }

    async fn handle(&self, session_id: &str) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(session_id) {
                return handle.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Ordered turn history for a session. Unknown sessions yield an empty
    /// sequence, never an error.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, AppError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(handle) => {
                let turns = handle.lock().await;
                Ok(turns.iter().cloned().collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Append a turn, evicting the oldest once the cap is reached. Returns
    /// the post-append history snapshot.
    pub async fn append(&self, session_id: &str, turn: Turn) -> Result<Vec<Turn>, AppError> {
        let handle = self.handle(session_id).await;
        let mut turns = handle.lock().await;
        while turns.len() >= self.max_turns {
            turns.pop_front();
        }
        turns.push_back(turn);
        Ok(turns.iter().cloned().collect())
    }

    /// Empty a session's history. The session key itself is retained.
    pub async fn clear(&self, session_id: &str) -> Result<(), AppError> {
        let sessions = self.sessions.read().await;
        if let Some(handle) = sessions.get(session_id) {
            handle.lock().await.clear();
        }
        Ok(())
    }

    /// Number of sessions ever touched (cleared sessions included)
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
