use crate::core::models::definition::StoredEntry;
use crate::core::models::result::QsarResult;
use std::collections::HashMap;

/// Per-model results keyed by canonical structure id, with the load-time defaults kept
/// aside for `reset` and `restore`.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    stored: HashMap<String, QsarResult>,
    defaults: HashMap<String, QsarResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(entries: &[StoredEntry]) -> Self {
        let defaults: HashMap<String, QsarResult> = entries
            .iter()
            .map(|e| (e.id.clone(), e.result.clone()))
            .collect();
        Self {
            stored: defaults.clone(),
            defaults,
        }
    }

    pub fn get(&self, id: &str) -> Option<&QsarResult> {
        self.stored.get(id)
    }

    pub fn insert(&mut self, id: &str, result: QsarResult) {
        self.stored.insert(id.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Puts back the default entry for `id`, if the model shipped one.
    pub fn load_default(&mut self, id: &str) -> bool {
        match self.defaults.get(id) {
            Some(result) => {
                self.stored.insert(id.to_string(), result.clone());
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<QsarResult> {
        self.stored.remove(id)
    }

    /// Replaces everything with the defaults.
    pub fn reset(&mut self) {
        self.stored = self.defaults.clone();
    }

    /// Merges the defaults back in, keeping entries the defaults do not cover.
    pub fn restore(&mut self) {
        for (id, result) in &self.defaults {
            self.stored.insert(id.clone(), result.clone());
        }
    }

    /// Drops overrides whose level is exactly `U`. Computed levels such as `EU` stay.
    pub fn erase_user(&mut self) {
        self.stored
            .retain(|_, r| !r.uncertainty_level.is_some_and(|ul| ul.is_user_only()));
    }

    /// Drops overrides whose level is exactly `E`. Computed levels such as `E0` stay.
    pub fn erase_experimental(&mut self) {
        self.stored
            .retain(|_, r| !r.uncertainty_level.is_some_and(|ul| ul.is_experimental_only()));
    }

    pub fn erase_all(&mut self) {
        self.stored.clear();
    }
}
