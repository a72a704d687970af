//! The graph-store seam used by the merge engine.
//!
//! Implemented by [`GraphClient`] against Neo4j and by
//! [`crate::memory::MemoryGraph`] in-process. Implementations must provide
//! merge-by-key on node name, an atomic partial property merge on edges and
//! append-if-absent on the edge provenance list.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storygraph_core::{EdgeProperties, PropertyValue};

use crate::client::{GraphClient, GraphError};

/// A node as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub label: String,
    pub created_at: String,
}

/// An edge as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub rel_type: String,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Ids of the documents that asserted this edge, in first-seen order.
    pub source_files: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Whether an edge upsert created the edge or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOutcome {
    Created,
    Merged,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the uniqueness constraint on node names if missing.
    async fn ensure_schema(&self) -> Result<(), GraphError>;

    /// Create the node keyed by `name` if absent. `label` is applied only on
    /// creation; an existing node keeps its label.
    async fn upsert_entity(&self, name: &str, label: &str) -> Result<(), GraphError>;

    /// Merge the `(source)-[rel_type]->(target)` edge.
    ///
    /// Fails with [`GraphError::EndpointMissing`] if either node is absent.
    /// Present properties overwrite stored values, `source_id` is appended
    /// to the provenance list unless already there, `updated_at` refreshes.
    async fn upsert_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &EdgeProperties,
        source_id: Option<&str>,
    ) -> Result<EdgeOutcome, GraphError>;

    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, GraphError>;

    async fn get_edge(
        &self,
        source: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>, GraphError>;

    async fn count_nodes(&self) -> Result<i64, GraphError>;

    async fn count_edges(&self) -> Result<i64, GraphError>;
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.create_constraints().await
    }

    async fn upsert_entity(&self, name: &str, label: &str) -> Result<(), GraphError> {
        self.merge_entity_node(name, label).await
    }

    async fn upsert_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &EdgeProperties,
        source_id: Option<&str>,
    ) -> Result<EdgeOutcome, GraphError> {
        self.merge_edge(source, target, rel_type, properties, source_id)
            .await
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, GraphError> {
        self.find_entity(name).await
    }

    async fn get_edge(
        &self,
        source: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>, GraphError> {
        self.find_edge(source, rel_type, target).await
    }

    async fn count_nodes(&self) -> Result<i64, GraphError> {
        self.count_entities().await
    }

    async fn count_edges(&self) -> Result<i64, GraphError> {
        self.count_relationships().await
    }
}
