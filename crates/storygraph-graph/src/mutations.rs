//! Write operations for the knowledge graph.
//!
//! All mutations use MERGE (upsert) semantics so that re-ingesting a
//! document is idempotent. Nodes are identified by `name` alone.

use std::collections::HashMap;

use chrono::Utc;
use neo4rs::{query, BoltType};

use storygraph_core::{EdgeProperties, PropertyValue};

use crate::client::{GraphClient, GraphError};
use crate::sanitize;
use crate::store::EdgeOutcome;

impl GraphClient {
    // ── Schema ───────────────────────────────────────────────────

    /// Create the uniqueness constraint backing node MERGE.
    pub async fn create_constraints(&self) -> Result<(), GraphError> {
        self.run(query(
            "CREATE CONSTRAINT entity_name_unique IF NOT EXISTS
             FOR (n:Entity) REQUIRE n.name IS UNIQUE",
        ))
        .await?;
        tracing::info!("Graph schema ensured");
        Ok(())
    }

    // ── Node Upserts ─────────────────────────────────────────────

    /// Merge an entity node. The label is applied only when the node is
    /// created; an existing node keeps whatever label it was created with.
    pub async fn merge_entity_node(&self, name: &str, label: &str) -> Result<(), GraphError> {
        let label = sanitize::label(label).value;
        let cypher = format!(
            "MERGE (n:Entity {{name: $name}})
             ON CREATE SET n:`{label}`, n.label = $label, n.created_at = $now"
        );

        let q = query(&cypher)
            .param("name", name.to_string())
            .param("label", label.clone())
            .param("now", Utc::now().to_rfc3339());

        self.run(q).await
    }

    // ── Edge Upserts ─────────────────────────────────────────────

    /// Merge the edge keyed by (source, type, target).
    ///
    /// Both endpoints must already exist; if either is missing the MATCH
    /// yields no row and [`GraphError::EndpointMissing`] is returned.
    pub async fn merge_edge(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &EdgeProperties,
        source_id: Option<&str>,
    ) -> Result<EdgeOutcome, GraphError> {
        let rel_type = sanitize::rel_type(rel_type).value;
        // `updated_at` is written before `source_files` is read, so the
        // append runs under the relationship's write lock and concurrent
        // merges cannot drop each other's source ids.
        let cypher = format!(
            "MATCH (a:Entity {{name: $source}})
             MATCH (b:Entity {{name: $target}})
             MERGE (a)-[r:`{rel_type}`]->(b)
             ON CREATE SET r.created_at = $now
             SET r.updated_at = $now
             WITH r
             SET r.source_files = CASE
                 WHEN $source_id = '' OR $source_id IN coalesce(r.source_files, [])
                   THEN coalesce(r.source_files, [])
                 ELSE coalesce(r.source_files, []) + $source_id
               END
             SET r += $props
             RETURN r.created_at = $now AS created"
        );

        let q = query(&cypher)
            .param("source", source.to_string())
            .param("target", target.to_string())
            .param("source_id", opt_str(source_id))
            .param("props", bolt_props(properties))
            .param("now", Utc::now().to_rfc3339());

        match self.query_one(q).await? {
            Some(row) => {
                let created: bool = row
                    .get("created")
                    .map_err(|e| GraphError::Serialization(format!("created flag: {e}")))?;
                Ok(if created {
                    EdgeOutcome::Created
                } else {
                    EdgeOutcome::Merged
                })
            }
            None => Err(GraphError::EndpointMissing {
                start_node: source.to_string(),
                end_node: target.to_string(),
                rel_type,
            }),
        }
    }
}

/// Convert edge properties into a Bolt map for `SET r += $props`.
///
/// Nulls are left out so that they never erase a stored value.
fn bolt_props(properties: &EdgeProperties) -> HashMap<String, BoltType> {
    properties
        .iter()
        .filter_map(|(key, value)| {
            let bolt: BoltType = match value {
                PropertyValue::Null => return None,
                PropertyValue::Bool(b) => (*b).into(),
                PropertyValue::Integer(i) => (*i).into(),
                PropertyValue::Float(f) => (*f).into(),
                PropertyValue::Text(s) => s.clone().into(),
            };
            Some(((*key).to_string(), bolt))
        })
        .collect()
}

/// Empty string stands in for "no source document".
fn opt_str(opt: Option<&str>) -> String {
    opt.unwrap_or_default().to_string()
}
