//! Registry of known query definitions, addressed by alias.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::query::definition::{ConfigurationError, QueryDefinition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no query registered under alias {0:?}")]
    UnknownAlias(String),
}

/// One entry of a slice: either an alias of a registered query or an
/// inline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SliceEntry {
    Alias(String),
    Query(QueryDefinition),
}

impl From<&str> for SliceEntry {
    fn from(alias: &str) -> Self {
        SliceEntry::Alias(alias.to_string())
    }
}

impl From<QueryDefinition> for SliceEntry {
    fn from(query: QueryDefinition) -> Self {
        SliceEntry::Query(query)
    }
}

#[derive(Default)]
struct Inner {
    definitions: Vec<Arc<QueryDefinition>>,
    aliases: HashSet<String>,
}

/// Holds the registered definitions. Registration is idempotent per key:
/// re-adding a known key, even with different content, is a no-op.
#[derive(Default)]
pub struct RequestRegistry {
    inner: RwLock<Inner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the initial definitions, validating each.
    ///
    /// Duplicate keys keep the first definition.
    pub fn with_definitions(
        definitions: impl IntoIterator<Item = QueryDefinition>,
    ) -> Result<Self, ConfigurationError> {
        let registry = Self::new();
        for definition in definitions {
            registry.add(definition)?;
        }
        Ok(registry)
    }

    /// Look up a definition by alias.
    pub fn resolve(&self, key: &str) -> Option<Arc<QueryDefinition>> {
        self.inner
            .read()
            .definitions
            .iter()
            .find(|d| d.key == key)
            .cloned()
    }

    pub fn resolve_required(&self, key: &str) -> Result<Arc<QueryDefinition>, RegistryError> {
        self.resolve(key)
            .ok_or_else(|| RegistryError::UnknownAlias(key.to_string()))
    }

    /// Register a definition. Returns `Ok(false)` when the key was already known.
    pub fn add(&self, definition: QueryDefinition) -> Result<bool, ConfigurationError> {
        definition.validate()?;
        Ok(self.add_shared(Arc::new(definition)))
    }

    fn add_shared(&self, definition: Arc<QueryDefinition>) -> bool {
        let mut inner = self.inner.write();
        if !inner.aliases.insert(definition.key.clone()) {
            debug!(key = %definition.key, "Alias already registered, ignoring");
            return false;
        }
        debug!(key = %definition.key, endpoint = %definition.endpoint, "Registered query");
        inner.definitions.push(definition);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().aliases.contains(key)
    }

    /// Snapshot of the registered definitions in registration order.
    pub fn all(&self) -> Vec<Arc<QueryDefinition>> {
        self.inner.read().definitions.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve slice entries into definitions, best effort.
    ///
    /// Aliases are looked up and skipped with a warning when unknown. Inline
    /// definitions are registered (a no-op for known keys) and used as given;
    /// invalid ones are skipped.
    pub fn resolve_entries<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a SliceEntry>,
    ) -> Vec<Arc<QueryDefinition>> {
        let mut resolved = Vec::new();
        for entry in entries {
            match entry {
                SliceEntry::Alias(alias) => match self.resolve_required(alias) {
                    Ok(definition) => resolved.push(definition),
                    Err(e) => warn!("Skipping slice entry: {e}"),
                },
                SliceEntry::Query(query) => {
                    if let Err(e) = query.validate() {
                        warn!("Skipping invalid inline query: {e}");
                        continue;
                    }
                    let definition = Arc::new(query.clone());
                    self.add_shared(definition.clone());
                    resolved.push(definition);
                }
            }
        }
        resolved
    }
}
