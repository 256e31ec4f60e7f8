use std::sync::Arc;

use tracing::warn;

use super::{ValidationInput, ValidationOutcome, Validator};
use crate::llm::safety::SignatureSet;

/// Rejects replies that expose prompt internals or echo an injection attempt.
pub struct LeakValidator {
    signatures: Arc<SignatureSet>,
}

impl LeakValidator {
    pub fn new(signatures: Arc<SignatureSet>) -> Self {
        Self { signatures }
    }
}

impl Validator for LeakValidator {
    fn name(&self) -> &'static str {
        "leak"
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidationOutcome {
        let response_lower = input.response.to_lowercase();

        if let Some(keyword) = self
            .signatures
            .leak_keywords
            .iter()
            .find(|keyword| response_lower.contains(keyword.as_str()))
        {
            warn!(validator = self.name(), keyword = %keyword, "internal keyword in reply");
            return ValidationOutcome::fatal("internal information leak detected");
        }

        if self
            .signatures
            .leak_patterns
            .iter()
            .any(|pattern| pattern.is_match(input.response))
        {
            return ValidationOutcome::regenerate("potential system prompt leak detected");
        }

        let question_lower = input.user_question.to_lowercase();
        if self.signatures.echo_phrases.iter().any(|phrase| {
            question_lower.contains(phrase.as_str()) && response_lower.contains(phrase.as_str())
        }) {
            return ValidationOutcome::regenerate("injection phrase echoed in reply");
        }

        ValidationOutcome::Valid
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::LeakValidator;
    use crate::llm::safety::SignatureSet;
    use crate::llm::validation::{ValidationInput, ValidationOutcome, Validator};
    use crate::models::Language;

    fn validate(question: &str, response: &str) -> ValidationOutcome {
        LeakValidator::new(Arc::new(SignatureSet::baseline())).validate(&ValidationInput {
            response,
            user_question: question,
            pinned_item: None,
            language: Language::En,
        })
    }

    #[test]
    fn clean_reply_passes() {
        assert!(validate("Any good books?", "Try [item::The Pragmatic Programmer::book-003].").is_valid());
    }

    #[test]
    fn internal_keyword_is_fatal() {
        assert!(matches!(
            validate("hi", "I called search_books for you."),
            ValidationOutcome::Fatal { .. }
        ));
    }

    #[test]
    fn leak_pattern_needs_regeneration() {
        assert!(matches!(
            validate("hi", "My system prompt says to be nice."),
            ValidationOutcome::NeedsRegeneration { .. }
        ));
    }

    #[test]
    fn echo_requires_phrase_in_both_question_and_reply() {
        assert!(matches!(
            validate("let's talk about jailbreak tricks", "A jailbreak is not something I do."),
            ValidationOutcome::NeedsRegeneration { .. }
        ));
        assert!(validate("what is this book about?", "It covers a jailbreak story.").is_valid());
    }
}
