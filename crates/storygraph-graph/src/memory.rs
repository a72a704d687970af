//! In-process graph store.
//!
//! Mirrors the MERGE semantics of the Neo4j client so the merge engine and
//! the document pipeline can be exercised without a database. Supports
//! simple fault injection for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use storygraph_core::{EdgeProperties, PropertyValue};

use crate::client::GraphError;
use crate::sanitize;
use crate::store::{EdgeOutcome, EdgeRecord, GraphStore, NodeRecord};

type EdgeKey = (String, String, String);

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<String, NodeRecord>,
    /// Keyed by (source, type, target).
    edges: BTreeMap<EdgeKey, EdgeRecord>,
    failing_names: HashSet<String>,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<MemoryState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of the entity `name` fail with a connection error.
    pub fn fail_upserts_for(&self, name: impl Into<String>) {
        self.lock().failing_names.insert(name.into());
    }

    /// Simulate losing the database: every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.lock().nodes.values().cloned().collect()
    }

    pub fn edges(&self) -> Vec<EdgeRecord> {
        self.lock().edges.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(state: &MemoryState) -> Result<(), GraphError> {
        if state.offline {
            return Err(GraphError::Connection("memory graph offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_schema(&self) -> Result<(), GraphError> {
        Self::check_online(&self.lock())
    }

    async fn upsert_entity(&self, name: &str, label: &str) -> Result<(), GraphError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        if state.failing_names.contains(name) {
            return Err(GraphError::Connection(format!("injected failure for {name}")));
        }
        let label = sanitize::label(label).value;
        state
            .nodes
            .entry(name.to_string())
            .or_insert_with(|| NodeRecord {
                name: name.to_string(),
                label,
                created_at: Utc::now().to_rfc3339(),
            });
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &EdgeProperties,
        source_id: Option<&str>,
    ) -> Result<EdgeOutcome, GraphError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        let rel_type = sanitize::rel_type(rel_type).value;
        if !state.nodes.contains_key(source) || !state.nodes.contains_key(target) {
            return Err(GraphError::EndpointMissing {
                start_node: source.to_string(),
                end_node: target.to_string(),
                rel_type,
            });
        }

        let now = Utc::now().to_rfc3339();
        let key = (source.to_string(), rel_type.clone(), target.to_string());
        let outcome = if state.edges.contains_key(&key) {
            EdgeOutcome::Merged
        } else {
            EdgeOutcome::Created
        };
        let record = state.edges.entry(key).or_insert_with(|| EdgeRecord {
            source: source.to_string(),
            target: target.to_string(),
            rel_type,
            properties: BTreeMap::new(),
            source_files: Vec::new(),
            created_at: now.clone(),
            updated_at: now.clone(),
        });
        record.updated_at = now;

        if let Some(id) = source_id.filter(|id| !id.is_empty()) {
            if !record.source_files.iter().any(|f| f == id) {
                record.source_files.push(id.to_string());
            }
        }
        for (k, v) in properties {
            if !matches!(v, PropertyValue::Null) {
                record.properties.insert((*k).to_string(), v.clone());
            }
        }
        Ok(outcome)
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, GraphError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.nodes.get(name).cloned())
    }

    async fn get_edge(
        &self,
        source: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>, GraphError> {
        let state = self.lock();
        Self::check_online(&state)?;
        let key = (
            source.to_string(),
            sanitize::rel_type(rel_type).value,
            target.to_string(),
        );
        Ok(state.edges.get(&key).cloned())
    }

    async fn count_nodes(&self) -> Result<i64, GraphError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.nodes.len() as i64)
    }

    async fn count_edges(&self) -> Result<i64, GraphError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.edges.len() as i64)
    }
}
