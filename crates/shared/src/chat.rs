use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Book, Catalog, referenced_ids};
use crate::llm::context::{ContextOptions, SelectedItem, build_message_context};
use crate::llm::prompts::{
    BLOCKED_EMOTION, BLOCKED_REPLY, BLOCKED_SUGGESTIONS, default_suggestions, system_prompt,
};
use crate::llm::response::{ParsedResponse, parse_response, strip_control_tags};
use crate::llm::safety::{InjectionGate, Sanitizer, SignatureSet, char_count, normalize_message};
use crate::llm::tools::{CatalogTools, ToolHandler};
use crate::llm::validation::{
    Corrector, LeakValidator, ReferenceValidator, Resolution, ValidationInput, ValidationPipeline,
    Validator,
};
use crate::llm::{ChatMessage, GatewayError, GenerationRequest, ModelGateway};
use crate::models::{ChatResponse, Emotion, Language, MAX_MESSAGE_CHARS};
use crate::portfolio::Portfolio;
use crate::session::{
    ConversationStore, RECENT_CONVERSATION_STATE_KEY, RecommendationMemory, SessionError,
    SessionService,
};
use crate::throttle::{Throttle, ThrottleScope};

pub const APP_NAME: &str = "talking-bookshelf";
const OWNER_ID_PREFIX: &str = "user_";
const OWNER_ID_HEX_CHARS: usize = 16;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("item {0} not found")]
    ItemNotFound(String),
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited {
        scope: ThrottleScope,
        retry_after_seconds: u64,
    },
    #[error("model request timed out")]
    Timeout,
    #[error("model provider throttled, retry after {retry_after_seconds}s")]
    UpstreamThrottled { retry_after_seconds: u64 },
    #[error("model provider unavailable: {0}")]
    Unavailable(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for ChatError {
    fn from(err: SessionError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<GatewayError> for ChatError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout | GatewayError::DeadlineExceeded => Self::Timeout,
            GatewayError::Cancelled => Self::Cancelled,
            GatewayError::QuotaExhausted {
                retry_after_seconds,
            } => Self::UpstreamThrottled {
                retry_after_seconds,
            },
            GatewayError::Unavailable(detail) => Self::Unavailable(detail),
            GatewayError::ProviderFailure(detail) | GatewayError::InvalidProviderPayload(detail) => {
                Self::Internal(detail)
            }
        }
    }
}

/// One inbound chat message after transport decoding.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: String,
    pub item_id: Option<String>,
    pub session_id: Option<String>,
    pub language: Language,
    /// Rate-limit identity of the caller, usually the client IP.
    pub source: String,
}

pub struct ChatServiceParts {
    pub catalog: Arc<Catalog>,
    pub portfolio: Arc<Portfolio>,
    pub gateway: Arc<dyn ModelGateway>,
    pub sessions: Arc<dyn SessionService>,
    pub throttle: Throttle,
    pub signatures: Arc<SignatureSet>,
}

/// The conversation request pipeline.
pub struct ChatService {
    catalog: Arc<Catalog>,
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<dyn ToolHandler>,
    conversations: ConversationStore,
    recommendations: RecommendationMemory,
    throttle: Throttle,
    gate: InjectionGate,
    sanitizer: Sanitizer,
    pipeline: ValidationPipeline,
}

impl ChatService {
    pub fn new(parts: ChatServiceParts) -> Self {
        let sanitizer = Sanitizer::new(Arc::clone(&parts.signatures));
        let tools: Arc<dyn ToolHandler> = Arc::new(CatalogTools::new(
            Arc::clone(&parts.catalog),
            parts.portfolio,
            sanitizer.clone(),
        ));
        let validators: Vec<Box<dyn Validator>> = vec![
            Box::new(LeakValidator::new(Arc::clone(&parts.signatures))),
            Box::new(ReferenceValidator::new(Arc::clone(&parts.catalog))),
        ];
        let pipeline = ValidationPipeline::new(
            validators,
            Corrector::new(Arc::clone(&parts.gateway), sanitizer.clone()),
        );

        Self {
            catalog: parts.catalog,
            gateway: parts.gateway,
            tools,
            conversations: ConversationStore::new(parts.sessions, APP_NAME),
            recommendations: RecommendationMemory::new(),
            throttle: parts.throttle,
            gate: InjectionGate::new(parts.signatures),
            sanitizer,
            pipeline,
        }
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn recommendations(&self) -> &RecommendationMemory {
        &self.recommendations
    }

    pub async fn respond(
        &self,
        turn: ChatTurn,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let started = Instant::now();
        let message = normalize_message(&turn.message);
        if message.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message is required".to_string()));
        }
        if char_count(&message) > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong {
                max: MAX_MESSAGE_CHARS,
            });
        }

        if self.gate.is_injection_attempt(&message) {
            return Ok(blocked_reply(turn.session_id.unwrap_or_default()));
        }

        let pinned = self.pinned_item(turn.item_id.as_deref())?;

        self.throttle
            .check(&turn.source)
            .map_err(|rejection| ChatError::RateLimited {
                scope: rejection.scope,
                retry_after_seconds: rejection.retry_after_seconds(),
            })?;

        let owner_id = owner_id_for_source(&turn.source);
        let session = self
            .conversations
            .open(&owner_id, turn.session_id.as_deref().filter(|id| !id.trim().is_empty()))
            .await?;
        let session = self.conversations.compact_if_needed(session).await;

        let conversation = session.key();
        let excluded_ids = self.recommendations.get(&conversation);
        let selected = pinned.map(|book| SelectedItem {
            id: book.id.clone(),
            title: book.title.clone(),
            author: book.author.clone(),
            notes: self.sanitizer.private_notes(&book.private_notes),
        });
        let prompt = build_message_context(
            &message,
            &ContextOptions {
                language: turn.language,
                selected_item: selected.as_ref(),
                prior_summary: session
                    .state
                    .get(RECENT_CONVERSATION_STATE_KEY)
                    .map(String::as_str),
                excluded_ids: &excluded_ids,
            },
        );

        let mut messages = session.history();
        messages.push(ChatMessage::user(prompt));
        let generated = self
            .gateway
            .generate(GenerationRequest::generate(
                system_prompt(),
                messages,
                Some(Arc::clone(&self.tools)),
                cancel.clone(),
            ))
            .await
            .map_err(|err| {
                warn!(session_id = %session.id, error = %err, "generation failed");
                ChatError::from(err)
            })?;

        let parsed = parse_response(&generated.text);
        let validated = self
            .pipeline
            .run(
                &ValidationInput {
                    response: &parsed.body,
                    user_question: &message,
                    pinned_item: pinned,
                    language: turn.language,
                },
                &cancel,
            )
            .await;
        let reply = finalize_reply(&parsed, &validated.text, validated.resolution, turn.language);

        let surfaced = referenced_ids(&reply.response);
        self.recommendations
            .merge(&conversation, &surfaced, &self.catalog);

        if let Err(err) = self
            .conversations
            .record_exchange(&session, &message, &reply.response)
            .await
        {
            warn!(session_id = %session.id, error = %err, "failed to record chat exchange");
        }

        info!(
            session_id = %session.id,
            model = %generated.model,
            resolution = validated.resolution.as_str(),
            failed_validator = validated.failed_validator.unwrap_or("none"),
            references = surfaced.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "chat reply delivered"
        );

        Ok(ChatResponse {
            response: reply.response,
            emotion: reply.emotion,
            suggestions: reply.suggestions,
            session_id: session.id,
        })
    }

    fn pinned_item(&self, item_id: Option<&str>) -> Result<Option<&Book>, ChatError> {
        let Some(item_id) = item_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        self.catalog
            .get(item_id)
            .map(Some)
            .ok_or_else(|| ChatError::ItemNotFound(item_id.to_string()))
    }
}

struct FinalReply {
    response: String,
    emotion: Emotion,
    suggestions: Vec<String>,
}

fn finalize_reply(
    parsed: &ParsedResponse,
    validated_text: &str,
    resolution: Resolution,
    language: Language,
) -> FinalReply {
    match resolution {
        Resolution::Passed => FinalReply {
            response: strip_control_tags(&parsed.body),
            emotion: parsed.emotion,
            suggestions: parsed.suggestions.clone(),
        },
        Resolution::Corrected | Resolution::Regenerated => {
            let replacement = parse_response(validated_text);
            FinalReply {
                response: strip_control_tags(&replacement.body),
                emotion: if replacement.has_emotion_tag {
                    replacement.emotion
                } else {
                    parsed.emotion
                },
                suggestions: if replacement.suggestions.is_empty() {
                    parsed.suggestions.clone()
                } else {
                    replacement.suggestions
                },
            }
        }
        Resolution::Apology => FinalReply {
            response: strip_control_tags(validated_text),
            emotion: Emotion::Thinking,
            suggestions: default_suggestions(language),
        },
    }
}

/// Canned reply for messages stopped by the injection gate.
pub fn blocked_reply(session_id: String) -> ChatResponse {
    ChatResponse {
        response: BLOCKED_REPLY.to_string(),
        emotion: BLOCKED_EMOTION,
        suggestions: BLOCKED_SUGGESTIONS
            .iter()
            .map(|entry| (*entry).to_string())
            .collect(),
        session_id,
    }
}

/// Stable conversation-owner id derived from the request source, so raw
/// addresses never reach the session store.
pub fn owner_id_for_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("{OWNER_ID_PREFIX}{}", &hex[..OWNER_ID_HEX_CHARS])
}

#[cfg(test)]
mod tests {
    use super::{blocked_reply, finalize_reply, owner_id_for_source};
    use crate::llm::response::parse_response;
    use crate::llm::validation::Resolution;
    use crate::models::{Emotion, Language};

    #[test]
    fn owner_id_is_prefixed_hash_prefix() {
        let id = owner_id_for_source("203.0.113.7");
        assert!(id.starts_with("user_"));
        assert_eq!(id.len(), "user_".len() + 16);
        assert!(id["user_".len()..].chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(id, owner_id_for_source("203.0.113.7"));
        assert_ne!(id, owner_id_for_source("203.0.113.8"));
        assert!(!id.contains("203"));
    }

    #[test]
    fn blocked_reply_echoes_session_id() {
        let reply = blocked_reply("abc".to_string());
        assert_eq!(reply.session_id, "abc");
        assert_eq!(reply.emotion, Emotion::Idle);
        assert_eq!(reply.suggestions, vec!["おすすめの本は？", "最近読んだ本は？"]);
    }

    #[test]
    fn regenerated_reply_keeps_original_tags_when_replacement_has_none() {
        let parsed = parse_response("bad [EMOTION:surprised] [SUGGESTIONS:a|b]");
        let reply = finalize_reply(&parsed, "plain fix", Resolution::Regenerated, Language::En);

        assert_eq!(reply.response, "plain fix");
        assert_eq!(reply.emotion, Emotion::Surprised);
        assert_eq!(reply.suggestions, vec!["a", "b"]);
    }

    #[test]
    fn apology_uses_localized_defaults() {
        let parsed = parse_response("leaky [SUGGESTIONS:x]");
        let reply = finalize_reply(
            &parsed,
            "うーん、ちょっと混乱しちゃった。もう一度聞いてもらえる？",
            Resolution::Apology,
            Language::Ja,
        );

        assert_eq!(reply.emotion, Emotion::Thinking);
        assert_eq!(reply.suggestions, vec!["おすすめの本は？", "最近読んだ本は？"]);
    }
}
