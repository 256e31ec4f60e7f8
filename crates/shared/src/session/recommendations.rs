use std::collections::HashMap;
use std::sync::Mutex;

use super::SessionKey;
use crate::catalog::Catalog;

/// Catalog ids already surfaced per conversation. Keyed by the full session key,
/// whose id survives compaction, so the list is never reset by it.
#[derive(Debug, Default)]
pub struct RecommendationMemory {
    entries: Mutex<HashMap<SessionKey, Vec<String>>>,
}

impl RecommendationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Vec<String>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, conversation: &SessionKey) -> Vec<String> {
        self.lock_entries()
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends ids that exist in `catalog` and are not yet remembered, keeping
    /// first-occurrence order. Returns the updated list.
    pub fn merge(
        &self,
        conversation: &SessionKey,
        ids: &[String],
        catalog: &Catalog,
    ) -> Vec<String> {
        let mut entries = self.lock_entries();
        let remembered = entries.entry(conversation.clone()).or_default();
        for id in ids {
            if catalog.contains(id) && !remembered.contains(id) {
                remembered.push(id.clone());
            }
        }
        let snapshot = remembered.clone();
        if snapshot.is_empty() {
            entries.remove(conversation);
        }
        snapshot
    }
}
