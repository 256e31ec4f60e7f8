use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::Book;
use crate::llm::gateway::{GenerationRequest, ModelGateway};
use crate::llm::prompts::{CorrectionItem, correction_prompt, fallback_message};
use crate::llm::safety::Sanitizer;
use crate::models::Language;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub text: String,
    pub used_fallback: bool,
}

/// One-shot regeneration on the assist tier. Never re-validates its own output.
pub struct Corrector {
    gateway: Arc<dyn ModelGateway>,
    sanitizer: Sanitizer,
}

impl Corrector {
    pub fn new(gateway: Arc<dyn ModelGateway>, sanitizer: Sanitizer) -> Self {
        Self { gateway, sanitizer }
    }

    pub async fn regenerate(
        &self,
        question: &str,
        pinned_item: Option<&Book>,
        language: Language,
        cancel: &CancellationToken,
    ) -> Correction {
        let notes = pinned_item.map(|book| self.sanitizer.private_notes(&book.private_notes));
        let item = pinned_item
            .zip(notes.as_deref())
            .map(|(book, notes)| CorrectionItem {
                title: &book.title,
                author: &book.author,
                id: &book.id,
                notes,
            });
        let prompt = correction_prompt(question, language, item);

        match self
            .gateway
            .generate(GenerationRequest::assist(prompt, cancel.clone()))
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => {
                info!(model = %response.model, "corrective regeneration succeeded");
                Correction {
                    text: response.text.trim().to_string(),
                    used_fallback: false,
                }
            }
            Ok(_) => {
                warn!("corrective regeneration returned empty text");
                fallback(language)
            }
            Err(err) => {
                warn!(error = %err, "corrective regeneration failed");
                fallback(language)
            }
        }
    }
}

fn fallback(language: Language) -> Correction {
    Correction {
        text: fallback_message(language).to_string(),
        used_fallback: true,
    }
}
