use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::llm::{ChatMessage, ChatRole};

mod compaction;
mod recommendations;

pub use compaction::{
    ConversationStore, DEFAULT_RETAINED_EXCHANGES, RECENT_CONVERSATION_STATE_KEY,
    render_transcript,
};
pub use recommendations::RecommendationMemory;

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub turns: Vec<Turn>,
    pub state: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(Turn::to_message).collect()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} already exists")]
    AlreadyExists(String),
    #[error("session storage unavailable: {0}")]
    Storage(String),
}

/// Conversation storage keyed by (application, user, session).
pub trait SessionService: Send + Sync {
    /// Creates a session. `session_id` of `None` mints a fresh id.
    fn create<'a>(
        &'a self,
        app_name: &'a str,
        user_id: &'a str,
        session_id: Option<&'a str>,
        state: HashMap<String, String>,
    ) -> SessionFuture<'a, Session>;

    fn get<'a>(&'a self, key: &'a SessionKey) -> SessionFuture<'a, Option<Session>>;

    fn append_turns<'a>(
        &'a self,
        key: &'a SessionKey,
        turns: Vec<Turn>,
    ) -> SessionFuture<'a, Session>;

    fn delete<'a>(&'a self, key: &'a SessionKey) -> SessionFuture<'a, ()>;

    /// Swaps an existing session for a fresh one under the same key holding
    /// `state`. Readers observe either the old or the new session, never neither.
    fn replace<'a>(
        &'a self,
        key: &'a SessionKey,
        state: HashMap<String, String>,
    ) -> SessionFuture<'a, Session>;
}

/// Process-lifetime session map.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }
}

impl SessionService for InMemorySessionService {
    fn create<'a>(
        &'a self,
        app_name: &'a str,
        user_id: &'a str,
        session_id: Option<&'a str>,
        state: HashMap<String, String>,
    ) -> SessionFuture<'a, Session> {
        Box::pin(async move {
            let id = session_id
                .map(ToString::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let key = SessionKey::new(app_name, user_id, &id);
            let now = Utc::now();
            let session = Session {
                id,
                app_name: app_name.to_string(),
                user_id: user_id.to_string(),
                turns: Vec::new(),
                state,
                created_at: now,
                updated_at: now,
            };

            let mut sessions = self.lock_sessions();
            if sessions.contains_key(&key) {
                return Err(SessionError::AlreadyExists(key.session_id));
            }
            sessions.insert(key, session.clone());
            Ok(session)
        })
    }

    fn get<'a>(&'a self, key: &'a SessionKey) -> SessionFuture<'a, Option<Session>> {
        Box::pin(async move { Ok(self.lock_sessions().get(key).cloned()) })
    }

    fn append_turns<'a>(
        &'a self,
        key: &'a SessionKey,
        turns: Vec<Turn>,
    ) -> SessionFuture<'a, Session> {
        Box::pin(async move {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(key)
                .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))?;
            session.turns.extend(turns);
            session.updated_at = Utc::now();
            Ok(session.clone())
        })
    }

    fn delete<'a>(&'a self, key: &'a SessionKey) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            self.lock_sessions()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))
        })
    }

    fn replace<'a>(
        &'a self,
        key: &'a SessionKey,
        state: HashMap<String, String>,
    ) -> SessionFuture<'a, Session> {
        Box::pin(async move {
            let mut sessions = self.lock_sessions();
            let slot = sessions
                .get_mut(key)
                .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))?;
            let now = Utc::now();
            *slot = Session {
                id: key.session_id.clone(),
                app_name: key.app_name.clone(),
                user_id: key.user_id.clone(),
                turns: Vec::new(),
                state,
                created_at: now,
                updated_at: now,
            };
            Ok(slot.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{InMemorySessionService, SessionError, SessionKey, SessionService, Turn};
    use crate::llm::ChatRole;

    #[tokio::test]
    async fn create_mints_id_and_get_is_scoped_by_user() {
        let service = InMemorySessionService::new();
        let session = service
            .create("bookshelf", "user_a", None, HashMap::new())
            .await
            .expect("create should succeed");
        assert!(!session.id.is_empty());

        let same_user = SessionKey::new("bookshelf", "user_a", &session.id);
        let other_user = SessionKey::new("bookshelf", "user_b", &session.id);
        assert!(service.get(&same_user).await.expect("get").is_some());
        assert!(service.get(&other_user).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let service = InMemorySessionService::new();
        service
            .create("bookshelf", "user_a", Some("s-1"), HashMap::new())
            .await
            .expect("first create");
        let err = service
            .create("bookshelf", "user_a", Some("s-1"), HashMap::new())
            .await
            .expect_err("second create should fail");
        assert!(matches!(err, SessionError::AlreadyExists(id) if id == "s-1"));
    }

    #[tokio::test]
    async fn append_and_delete() {
        let service = InMemorySessionService::new();
        let session = service
            .create("bookshelf", "user_a", Some("s-1"), HashMap::new())
            .await
            .expect("create");
        let key = session.key();

        let updated = service
            .append_turns(
                &key,
                vec![
                    Turn::new(ChatRole::User, "hi"),
                    Turn::new(ChatRole::Assistant, "hello"),
                ],
            )
            .await
            .expect("append");
        assert_eq!(updated.turns.len(), 2);
        assert_eq!(updated.history()[1].content, "hello");

        service.delete(&key).await.expect("delete");
        assert!(service.is_empty());
        assert!(matches!(
            service.delete(&key).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_swaps_session_in_place() {
        let service = InMemorySessionService::new();
        let session = service
            .create("bookshelf", "user_a", Some("s-1"), HashMap::new())
            .await
            .expect("create");
        let key = session.key();
        service
            .append_turns(&key, vec![Turn::new(ChatRole::User, "hi")])
            .await
            .expect("append");

        let state = HashMap::from([("summary".to_string(), "earlier talk".to_string())]);
        let replaced = service.replace(&key, state).await.expect("replace");

        assert_eq!(replaced.id, "s-1");
        assert!(replaced.turns.is_empty());
        assert_eq!(replaced.state["summary"], "earlier talk");
        assert_eq!(service.len(), 1);
        let stored = service.get(&key).await.expect("get").expect("still present");
        assert_eq!(stored, replaced);
    }

    #[tokio::test]
    async fn replace_does_not_resurrect_missing_sessions() {
        let service = InMemorySessionService::new();
        let key = SessionKey::new("bookshelf", "user_a", "gone");

        let err = service
            .replace(&key, HashMap::new())
            .await
            .expect_err("missing session should fail");
        assert!(matches!(err, SessionError::NotFound(id) if id == "gone"));
        assert!(service.is_empty());
    }
}
