use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::prompts::fallback_message;
use crate::catalog::Book;
use crate::models::Language;

mod corrector;
mod leak;
mod references;

pub use corrector::Corrector;
pub use leak::LeakValidator;
pub use references::ReferenceValidator;

/// Everything a validator may inspect about one reply.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// Tag-free reply body.
    pub response: &'a str,
    pub user_question: &'a str,
    pub pinned_item: Option<&'a Book>,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// Unrecoverable; answer with the localized apology and skip regeneration.
    Fatal { reason: String },
    /// The validator already produced a safe replacement.
    Corrected { reason: String, text: String },
    NeedsRegeneration { reason: String },
}

impl ValidationOutcome {
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn regenerate(reason: impl Into<String>) -> Self {
        Self::NeedsRegeneration {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &ValidationInput<'_>) -> ValidationOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Passed,
    Corrected,
    Regenerated,
    Apology,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Corrected => "corrected",
            Self::Regenerated => "regenerated",
            Self::Apology => "apology",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReply {
    pub text: String,
    pub resolution: Resolution,
    pub failed_validator: Option<&'static str>,
}

/// Ordered validators; the first failure decides the reply.
pub struct ValidationPipeline {
    validators: Vec<Box<dyn Validator>>,
    corrector: Corrector,
}

impl ValidationPipeline {
    pub fn new(validators: Vec<Box<dyn Validator>>, corrector: Corrector) -> Self {
        Self {
            validators,
            corrector,
        }
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|validator| validator.name()).collect()
    }

    pub async fn run(
        &self,
        input: &ValidationInput<'_>,
        cancel: &CancellationToken,
    ) -> ValidatedReply {
        for validator in &self.validators {
            let name = validator.name();
            match validator.validate(input) {
                ValidationOutcome::Valid => continue,
                ValidationOutcome::Corrected { reason, text } => {
                    info!(validator = name, reason = %reason, "validator supplied corrected reply");
                    return ValidatedReply {
                        text,
                        resolution: Resolution::Corrected,
                        failed_validator: Some(name),
                    };
                }
                ValidationOutcome::Fatal { reason } => {
                    warn!(validator = name, reason = %reason, "reply rejected without regeneration");
                    return ValidatedReply {
                        text: fallback_message(input.language).to_string(),
                        resolution: Resolution::Apology,
                        failed_validator: Some(name),
                    };
                }
                ValidationOutcome::NeedsRegeneration { reason } => {
                    warn!(validator = name, reason = %reason, "reply needs regeneration");
                    let correction = self
                        .corrector
                        .regenerate(
                            input.user_question,
                            input.pinned_item,
                            input.language,
                            cancel,
                        )
                        .await;
                    let resolution = if correction.used_fallback {
                        Resolution::Apology
                    } else {
                        Resolution::Regenerated
                    };
                    return ValidatedReply {
                        text: correction.text,
                        resolution,
                        failed_validator: Some(name),
                    };
                }
            }
        }

        ValidatedReply {
            text: input.response.to_string(),
            resolution: Resolution::Passed,
            failed_validator: None,
        }
    }
}
