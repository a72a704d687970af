//! The canonical name registry: an in-memory match cache over a
//! [`RegistryStore`].
//!
//! Reads take a shared lock, inserts take the exclusive lock, so a name
//! inserted by one worker is visible to every later resolve in the same
//! process. Other processes see new names after [`NameRegistry::reload`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use storygraph_core::{Entity, KgFragment, Relationship};

use crate::matching::{find_match, MatchKind, MatchPolicy};
use crate::normalize::normalize;
use crate::store::{RegistryEntry, RegistryStore, Result};

/// A registry hit for a name detected in a document, handed to the
/// extraction backend as known-entity context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMatch {
    /// The name as it appeared in the document.
    pub original: String,
    /// The canonical registry name it resolved to.
    pub matched: String,
    pub description: Option<String>,
}

#[derive(Default)]
struct RegistryCache {
    entries: Vec<RegistryEntry>,
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl RegistryCache {
    fn from_entries(entries: Vec<RegistryEntry>) -> Self {
        let mut cache = Self::default();
        for entry in entries {
            cache.push(entry);
        }
        cache
    }

    fn push(&mut self, entry: RegistryEntry) {
        if self.index.contains_key(&entry.name) {
            return;
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.keys.push(entry.name.clone());
        self.entries.push(entry);
    }

    fn find(&self, key: &str, threshold: f64, policy: &MatchPolicy) -> Option<(usize, MatchKind)> {
        if let Some(&idx) = self.index.get(key) {
            return Some((idx, MatchKind::Exact));
        }
        find_match(key, &self.keys, threshold, policy)
    }
}

pub struct NameRegistry {
    store: Arc<dyn RegistryStore>,
    cache: RwLock<RegistryCache>,
    policy: MatchPolicy,
}

impl NameRegistry {
    /// Build the registry from everything currently in `store`.
    pub fn open(store: Arc<dyn RegistryStore>, policy: MatchPolicy) -> Result<Self> {
        let entries = store.load_all()?;
        tracing::info!(entries = entries.len(), "Name registry loaded");
        Ok(Self {
            store,
            cache: RwLock::new(RegistryCache::from_entries(entries)),
            policy,
        })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Default fuzzy threshold from the policy.
    pub fn threshold(&self) -> f64 {
        self.policy.threshold
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryCache> {
        self.cache.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Registry cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryCache> {
        self.cache.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Registry cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ── Resolution ───────────────────────────────────────────────

    /// Resolve a free-text name to the canonical registry name, if any.
    pub fn resolve(&self, name: &str, threshold: f64) -> Option<String> {
        let key = normalize(name);
        let cache = self.read();
        let (idx, kind) = cache.find(&key, threshold, &self.policy)?;
        let canonical = cache.keys[idx].clone();
        if kind != MatchKind::Exact {
            tracing::debug!(name = %key, canonical = %canonical, kind = ?kind, "Name resolved");
        }
        Some(canonical)
    }

    /// Batch lookup for names detected in a document.
    ///
    /// Only matched names are returned, one per registry entry.
    pub fn context_for<S: AsRef<str>>(&self, names: &[S], threshold: f64) -> Vec<ContextMatch> {
        let cache = self.read();
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for name in names {
            let original = name.as_ref();
            let key = normalize(original);
            let Some((idx, _)) = cache.find(&key, threshold, &self.policy) else {
                continue;
            };
            if !seen.insert(idx) {
                continue;
            }
            let entry = &cache.entries[idx];
            matches.push(ContextMatch {
                original: original.to_string(),
                matched: entry.name.clone(),
                description: entry.description.clone(),
            });
        }

        matches
    }

    // ── Registration ─────────────────────────────────────────────

    /// Register a name if absent; attach a description if it has none yet.
    pub fn add(&self, name: &str, description: Option<&str>) {
        let key = normalize(name);
        if key.is_empty() {
            return;
        }
        let mut cache = self.write();
        if cache.index.contains_key(&key) {
            if let Some(desc) = description {
                self.backfill_locked(&mut cache, &key, desc);
            }
        } else {
            self.insert_locked(&mut cache, key, description);
        }
    }

    /// Resolve `name`, registering it if nothing matches.
    ///
    /// The miss path re-runs resolution under the write lock, so two workers
    /// racing on related names ("Путин", "Владимир Путин") still converge on a
    /// single entry. Returns `None` only for names that are empty once
    /// normalized.
    pub fn canonicalize(&self, name: &str, description: Option<&str>) -> Option<String> {
        let key = normalize(name);
        if key.is_empty() {
            return None;
        }
        let threshold = self.policy.threshold;

        if let Some(canonical) = self.resolve(&key, threshold) {
            if let Some(desc) = description {
                let mut cache = self.write();
                self.backfill_locked(&mut cache, &canonical, desc);
            }
            return Some(canonical);
        }

        let mut cache = self.write();
        if let Some((idx, _)) = cache.find(&key, threshold, &self.policy) {
            let canonical = cache.keys[idx].clone();
            if let Some(desc) = description {
                self.backfill_locked(&mut cache, &canonical, desc);
            }
            return Some(canonical);
        }

        self.insert_locked(&mut cache, key.clone(), description);
        Some(key)
    }

    fn insert_locked(&self, cache: &mut RegistryCache, key: String, description: Option<&str>) {
        let entry = RegistryEntry::new(key, description.map(str::to_string));
        match self.store.insert_if_absent(&entry) {
            Ok(true) => {
                tracing::debug!(name = %entry.name, "Registered new name");
                cache.push(entry);
            }
            Ok(false) => {
                // Another process registered it first; prefer its row.
                let stored = self.store.get(&entry.name).ok().flatten();
                cache.push(stored.unwrap_or(entry));
            }
            Err(e) => {
                tracing::warn!(
                    name = %entry.name,
                    error = %e,
                    "Failed to persist registry entry; will be treated as new next time"
                );
            }
        }
    }

    fn backfill_locked(&self, cache: &mut RegistryCache, key: &str, description: &str) {
        let Some(&idx) = cache.index.get(key) else {
            return;
        };
        if cache.entries[idx].description.is_some() || description.trim().is_empty() {
            return;
        }
        match self.store.attach_description(key, description) {
            Ok(true) => cache.entries[idx].description = Some(description.to_string()),
            Ok(false) => {
                // Another writer got there first; the stored row is authoritative.
                match self.store.get(key) {
                    Ok(Some(stored)) => cache.entries[idx].description = stored.description,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(name = %key, error = %e, "Failed to re-read registry entry");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(name = %key, error = %e, "Failed to attach description");
            }
        }
    }

    // ── Fragments ────────────────────────────────────────────────

    /// Rewrite a freshly extracted fragment onto canonical names.
    ///
    /// Each entity is resolved or registered; entities that collapse onto the
    /// same canonical name are merged (first label wins). Relationship
    /// endpoints go through the same mapping; endpoints that were not
    /// declared as entities are resolved without being registered.
    pub fn merge_fragment(&self, fragment: &KgFragment) -> KgFragment {
        let mut mapping: HashMap<String, String> = HashMap::new();
        let mut emitted = HashSet::new();
        let mut entities = Vec::with_capacity(fragment.entities.len());

        for entity in &fragment.entities {
            let Some(canonical) = self.canonicalize(&entity.name, entity.description.as_deref())
            else {
                tracing::warn!(name = %entity.name, "Dropping entity with empty name");
                continue;
            };
            mapping.insert(normalize(&entity.name), canonical.clone());
            if emitted.insert(canonical.clone()) {
                entities.push(Entity {
                    name: canonical,
                    label: entity.label.clone(),
                    description: entity.description.clone(),
                });
            }
        }

        let threshold = self.policy.threshold;
        let endpoint = |name: &str| -> String {
            let key = normalize(name);
            mapping
                .get(&key)
                .cloned()
                .or_else(|| self.resolve(&key, threshold))
                .unwrap_or(key)
        };

        let mut relationships = Vec::with_capacity(fragment.relationships.len());
        for rel in &fragment.relationships {
            let source = endpoint(&rel.source);
            let target = endpoint(&rel.target);
            if source == target {
                tracing::debug!(
                    name = %source,
                    rel_type = %rel.rel_type,
                    "Dropping self-loop produced by alias collapse"
                );
                continue;
            }
            relationships.push(Relationship {
                source,
                target,
                ..rel.clone()
            });
        }

        KgFragment {
            entities,
            relationships,
        }
    }

    // ── Introspection ────────────────────────────────────────────

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick up entries written by other processes. Returns the number of
    /// entries that were new to this cache.
    pub fn reload(&self) -> Result<usize> {
        let stored = self.store.load_all()?;
        let mut cache = self.write();
        let before = cache.entries.len();
        for entry in stored {
            cache.push(entry);
        }
        Ok(cache.entries.len() - before)
    }
}
