//! # Conversation state
//!
//! Each session keeps a short FIFO of its most recent question/answer pairs.
//! When the history is full the oldest turn is evicted, purely by insertion
//! order. Only the last few turns are rendered into the generation context.
//!
//! [`ConversationStore`] maps opaque session ids to their histories, keeping
//! at most a configured number of sessions (least recently used dropped
//! first). Every history sits behind its own async mutex: the orchestrator
//! holds it for a whole turn, so turns within one session are strictly
//! ordered while different sessions proceed independently and never see
//! each other's turns.
//!
//! ```rust
//! use osdr_rag::conversation::{ConversationHistory, ConversationTurn};
//!
//! let mut history = ConversationHistory::new(2);
//! history.append(ConversationTurn::new("q1", "a1"));
//! history.append(ConversationTurn::new("q2", "a2"));
//! history.append(ConversationTurn::new("q3", "a3"));
//!
//! assert_eq!(history.len(), 2);
//! assert_eq!(history.render(2), "Q: q2\nA: a2 Q: q3\nA: a3");
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex as StdMutex, PoisonError},
};
use tokio::sync::Mutex;
use tracing::debug;

/// One question and the answer given to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub response: String,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
        }
    }

    fn render(&self) -> String {
        format!("Q: {}\nA: {}", self.query, self.response)
    }
}

/// Bounded, oldest-first history of turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    /// FIFO store of turns (oldest at the front).
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a turn, evicting the oldest ones past capacity.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            if let Some(evicted) = self.turns.pop_front() {
                debug!(query = %evicted.query, "evicted oldest turn");
            }
        }
    }

    /// The last `n` turns, most recent last.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    /// The last `n` turns as `Q: ..\nA: ..` blocks joined by a space.
    /// An empty history renders as the empty string.
    pub fn render(&self, n: usize) -> String {
        self.recent(n)
            .map(ConversationTurn::render)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Sessions kept when no explicit bound is given.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct SessionEntry {
    history: SharedHistory,
    last_used: u64,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<String, SessionEntry>,
    clock: u64,
}

/// Session id to history, bounded to `max_sessions` entries.
///
/// Opening a session past the bound drops the least recently used one. A
/// turn already running on a dropped session finishes normally; its history
/// is simply not kept.
pub struct ConversationStore {
    capacity: usize,
    max_sessions: usize,
    sessions: StdMutex<Sessions>,
}

impl ConversationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: StdMutex::new(Sessions::default()),
        }
    }

    /// Bound the number of sessions kept; zero is treated as one.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// The history for `session`, created empty on first use.
    pub fn session(&self, session: &str) -> SharedHistory {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.clock += 1;
        let now = sessions.clock;

        if let Some(entry) = sessions.entries.get_mut(session) {
            entry.last_used = now;
            return Arc::clone(&entry.history);
        }

        while sessions.entries.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.entries.remove(&oldest);
            debug!(session = %oldest, "dropped least recently used conversation");
        }

        debug!(session, "new conversation");
        let history = Arc::new(Mutex::new(ConversationHistory::new(self.capacity)));
        sessions.entries.insert(
            session.to_string(),
            SessionEntry {
                history: Arc::clone(&history),
                last_used: now,
            },
        );
        history
    }

    /// Drop a session's history. Returns whether it existed.
    pub fn forget(&self, session: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(session)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Copy of a session's turns, oldest first. Unknown sessions are empty.
    ///
    /// Waits for any turn in progress on that session to finish. Does not
    /// count as a use of the session.
    pub async fn snapshot(&self, session: &str) -> Vec<ConversationTurn> {
        let history = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(session)
            .map(|entry| Arc::clone(&entry.history));
        match history {
            Some(history) => history.lock().await.turns().cloned().collect(),
            None => Vec::new(),
        }
    }
}
