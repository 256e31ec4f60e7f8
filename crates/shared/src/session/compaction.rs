use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Session, SessionError, SessionKey, SessionService, Turn};
use crate::llm::ChatRole;

pub const DEFAULT_RETAINED_EXCHANGES: usize = 3;
pub const RECENT_CONVERSATION_STATE_KEY: &str = "recent_conversation";
const MAX_TURN_CHARS: usize = 500;
const TRANSCRIPT_HEADER: &str = "[Recent conversation]";

/// Session access for the chat pipeline, with bounded history.
///
/// Once a conversation holds `2 * retained_exchanges` turns, the next request
/// swaps it for a fresh session under the same id whose state carries a
/// transcript of those turns.
pub struct ConversationStore {
    service: Arc<dyn SessionService>,
    app_name: String,
    retained_exchanges: usize,
    compaction_lock: Mutex<()>,
}

impl ConversationStore {
    pub fn new(service: Arc<dyn SessionService>, app_name: impl Into<String>) -> Self {
        Self::with_retained_exchanges(service, app_name, DEFAULT_RETAINED_EXCHANGES)
    }

    pub fn with_retained_exchanges(
        service: Arc<dyn SessionService>,
        app_name: impl Into<String>,
        retained_exchanges: usize,
    ) -> Self {
        Self {
            service,
            app_name: app_name.into(),
            retained_exchanges: retained_exchanges.max(1),
            compaction_lock: Mutex::new(()),
        }
    }

    pub fn compaction_threshold(&self) -> usize {
        self.retained_exchanges * 2
    }

    /// Returns the caller's session, creating it when the id is absent or unknown for this user.
    pub async fn open(
        &self,
        user_id: &str,
        requested_id: Option<&str>,
    ) -> Result<Session, SessionError> {
        if let Some(session_id) = requested_id {
            let key = SessionKey::new(&self.app_name, user_id, session_id);
            if let Some(session) = self.service.get(&key).await? {
                return Ok(session);
            }
        }

        let session = self
            .service
            .create(&self.app_name, user_id, requested_id, HashMap::new())
            .await?;
        info!(session_id = %session.id, "conversation session created");
        Ok(session)
    }

    /// Compacts `session` when it reached the threshold. Failures are logged and
    /// the original session is returned.
    pub async fn compact_if_needed(&self, session: Session) -> Session {
        if session.turns.len() < self.compaction_threshold() {
            return session;
        }

        let _guard = self.compaction_lock.lock().await;
        match self.compact(&session).await {
            Ok(Some(compacted)) => compacted,
            Ok(None) => session,
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "session compaction failed");
                session
            }
        }
    }

    async fn compact(&self, session: &Session) -> Result<Option<Session>, SessionError> {
        let key = session.key();
        // Another request may have compacted while we waited for the lock.
        let Some(current) = self.service.get(&key).await? else {
            return Ok(None);
        };
        if current.turns.len() < self.compaction_threshold() {
            return Ok(Some(current));
        }

        let keep_from = current.turns.len() - self.compaction_threshold();
        let transcript = render_transcript(&current.turns[keep_from..]);
        let state = HashMap::from([(RECENT_CONVERSATION_STATE_KEY.to_string(), transcript)]);

        let compacted = self.service.replace(&key, state).await?;
        info!(
            session_id = %compacted.id,
            compacted_turns = current.turns.len(),
            "session compacted"
        );
        Ok(Some(compacted))
    }

    pub async fn record_exchange(
        &self,
        session: &Session,
        user_text: &str,
        reply_text: &str,
    ) -> Result<Session, SessionError> {
        self.service
            .append_turns(
                &session.key(),
                vec![
                    Turn::new(ChatRole::User, user_text),
                    Turn::new(ChatRole::Assistant, reply_text),
                ],
            )
            .await
    }
}

/// `[Recent conversation]` transcript with each turn capped at 500 characters.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut transcript = String::from(TRANSCRIPT_HEADER);
    for turn in turns {
        let speaker = match turn.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        };
        transcript.push('\n');
        transcript.push_str(speaker);
        transcript.push_str(": ");
        transcript.push_str(&truncate_chars(&turn.text, MAX_TURN_CHARS));
    }
    transcript
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
