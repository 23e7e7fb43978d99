//! Per-conversation memory
//!
//! Each conversation keeps a bounded FIFO of turns. The store hands out one
//! async mutex per conversation; holding it for the whole turn serializes
//! concurrent queries on the same conversation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Default number of turns a conversation keeps
pub const DEFAULT_CAPACITY: usize = 5;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The person asking
    User,
    /// The engine
    Assistant,
}

impl TurnRole {
    /// Label used when rendering memory into a prompt
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A single remembered turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    /// Speaker
    pub role: TurnRole,
    /// Text
    pub text: String,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped now
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of turns; the oldest turn is evicted first
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConversationMemory {
    /// Create an empty memory; capacity is at least one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest when full
    pub fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Convenience for [`push`](Self::push)
    pub fn record(&mut self, role: TurnRole, text: impl Into<String>) {
        self.push(Turn::new(role, text));
    }

    /// All turns, oldest first
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> + ExactSizeIterator {
        self.turns.iter()
    }

    /// The last `n` turns, oldest first
    pub fn last(&self, n: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).collect()
    }

    /// Number of turns held
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn is held
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Maximum number of turns
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Handle to one conversation's memory
pub type SharedMemory = Arc<AsyncMutex<ConversationMemory>>;

/// Default number of conversations a store keeps
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1000;

#[derive(Debug)]
struct Slot {
    memory: SharedMemory,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Conversations {
    slots: HashMap<String, Slot>,
    clock: u64,
}

impl Conversations {
    /// Least recently used conversation, preferring ones no turn is holding
    fn eviction_candidate(&self) -> Option<String> {
        let idle = self
            .slots
            .iter()
            .filter(|(_, slot)| Arc::strong_count(&slot.memory) == 1)
            .min_by_key(|(_, slot)| slot.last_used);
        idle.or_else(|| self.slots.iter().min_by_key(|(_, slot)| slot.last_used))
            .map(|(id, _)| id.clone())
    }
}

/// Session-scoped map of conversation id to memory
///
/// Holds at most `max_conversations`; opening one more evicts the least
/// recently used conversation.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<Conversations>>,
    capacity: usize,
    max_conversations: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConversationStore {
    /// Create a store whose conversations keep `capacity` turns
    pub fn new(capacity: usize) -> Self {
        Self::with_limit(capacity, DEFAULT_MAX_CONVERSATIONS)
    }

    /// Create a store holding at most `max_conversations` conversations
    pub fn with_limit(capacity: usize, max_conversations: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Conversations::default())),
            capacity,
            max_conversations: max_conversations.max(1),
        }
    }

    /// Memory for a conversation, created on first use
    pub fn conversation(&self, id: &str) -> SharedMemory {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.clock += 1;
        let now = inner.clock;

        if let Some(slot) = inner.slots.get_mut(id) {
            slot.last_used = now;
            return Arc::clone(&slot.memory);
        }

        while inner.slots.len() >= self.max_conversations {
            let Some(evicted) = inner.eviction_candidate() else {
                break;
            };
            inner.slots.remove(&evicted);
            debug!(conversation = %evicted, "Evicted least recently used conversation");
        }

        let memory = Arc::new(AsyncMutex::new(ConversationMemory::new(self.capacity)));
        inner.slots.insert(
            id.to_string(),
            Slot {
                memory: Arc::clone(&memory),
                last_used: now,
            },
        );
        memory
    }

    /// Drop a conversation's memory; returns whether it existed
    pub fn end(&self, id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .remove(id)
            .is_some()
    }

    /// Number of live conversations
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).slots.len()
    }

    /// Whether no conversation is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
