use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use concierge_core::{ConversationState, ExecutionResult, Intent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One dialogue. Only the conversation engine mutates it, and only while
/// holding the session's lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub user_id: String,
    pub state: ConversationState,
    pub current_intent: Option<Intent>,
    pub collected_slots: Map<String, Value>,
    pub missing_slots: Vec<String>,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub last_result: Option<ExecutionResult>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            state: ConversationState::Greeting,
            current_intent: None,
            collected_slots: Map::new(),
            missing_slots: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            error_message: None,
            last_result: None,
        }
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        let timestamp = Utc::now();
        self.history.push(Turn { role, content: content.into(), timestamp });
        self.updated_at = timestamp;
    }

    pub fn clear_slots(&mut self) {
        self.current_intent = None;
        self.collected_slots.clear();
        self.missing_slots.clear();
    }

    pub fn is_idle_since(&self, now: DateTime<Utc>, idle_ttl: Duration) -> bool {
        match chrono::Duration::from_std(idle_ttl) {
            Ok(ttl) => now - self.updated_at > ttl,
            Err(_) => false,
        }
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<ConversationSession>>;

/// Holds live sessions. `checkout` hands out the per-session lock; callers
/// hold it for the whole message so turns on one session never interleave.
pub trait SessionStore: Send + Sync {
    fn checkout(&self, session_id: &str, user_id: &str) -> SessionHandle;
    fn get(&self, session_id: &str) -> Option<SessionHandle>;
    fn remove(&self, session_id: &str) -> bool;
    /// Drops sessions untouched for longer than `idle_ttl`. Sessions that are
    /// locked or checked out elsewhere are left alone.
    fn sweep_idle(&self, now: DateTime<Utc>, idle_ttl: Duration) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn checkout(&self, session_id: &str, user_id: &str) -> SessionHandle {
        self.lock()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(ConversationSession::new(session_id, user_id)))
            })
            .clone()
    }

    fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.lock().get(session_id).cloned()
    }

    fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    fn sweep_idle(&self, now: DateTime<Utc>, idle_ttl: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => !session.is_idle_since(now, idle_ttl),
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use concierge_core::ConversationState;

    use super::{InMemorySessionStore, Role, SessionStore};

    #[tokio::test]
    async fn checkout_creates_once_and_reuses() {
        let store = InMemorySessionStore::new();
        let first = store.checkout("s-1", "alice");
        first.lock().await.push_turn(Role::User, "hello");

        let again = store.checkout("s-1", "someone-else");
        let session = again.lock().await;
        assert_eq!(session.user_id, "alice");
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.state, ConversationState::Greeting);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_unlocked_sessions() {
        let store = InMemorySessionStore::new();
        drop(store.checkout("idle", "u"));
        drop(store.checkout("busy", "u"));
        let busy = store.checkout("busy", "u");
        let _guard = busy.lock().await;

        let later = Utc::now() + chrono::Duration::seconds(120);
        let removed = store.sweep_idle(later, Duration::from_secs(60));

        assert_eq!(removed, 1);
        assert!(store.get("idle").is_none());
        assert!(store.get("busy").is_some());
    }

    #[test]
    fn fresh_sessions_survive_sweep() {
        let store = InMemorySessionStore::new();
        drop(store.checkout("fresh", "u"));
        assert_eq!(store.sweep_idle(Utc::now(), Duration::from_secs(60)), 0);
        assert!(store.remove("fresh"));
        assert!(!store.remove("fresh"));
        assert!(store.is_empty());
    }
}
