use std::sync::Arc;

use tracing::warn;

use super::{ValidationInput, ValidationOutcome, Validator};
use crate::catalog::{Catalog, extract_references};

/// Every `[item::<title>::<id>]` must name a real book under its real title,
/// and a pinned book must be referenced at least once.
pub struct ReferenceValidator {
    catalog: Arc<Catalog>,
}

impl ReferenceValidator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

impl Validator for ReferenceValidator {
    fn name(&self) -> &'static str {
        "references"
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidationOutcome {
        let references = extract_references(input.response);

        for reference in &references {
            let Some(book) = self.catalog.get(&reference.id) else {
                warn!(validator = self.name(), item_id = %reference.id, "reply references unknown item");
                return ValidationOutcome::regenerate(format!(
                    "item id '{}' does not exist",
                    reference.id
                ));
            };
            if book.title != reference.title {
                warn!(validator = self.name(), item_id = %reference.id, "reply references item under wrong title");
                return ValidationOutcome::regenerate(format!(
                    "title mismatch for {}: expected '{}', got '{}'",
                    reference.id, book.title, reference.title
                ));
            }
        }

        if let Some(pinned) = input.pinned_item
            && !references.iter().any(|reference| reference.id == pinned.id)
        {
            return ValidationOutcome::regenerate(format!(
                "pinned item '{}' not referenced",
                pinned.id
            ));
        }

        ValidationOutcome::Valid
    }
}
