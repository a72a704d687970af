//! Read operations for the knowledge graph.

use std::collections::BTreeMap;

use neo4rs::query;

use storygraph_core::{PropertyValue, Relationship};

use crate::client::{GraphClient, GraphError};
use crate::sanitize;
use crate::store::{EdgeRecord, NodeRecord};

impl GraphClient {
    /// Look up an entity node by name.
    pub async fn find_entity(&self, name: &str) -> Result<Option<NodeRecord>, GraphError> {
        let q = query(
            "MATCH (n:Entity {name: $name})
             RETURN n.name AS name, n.label AS label, n.created_at AS created_at",
        )
        .param("name", name.to_string());

        Ok(self.query_one(q).await?.map(|row| NodeRecord {
            name: row.get("name").unwrap_or_default(),
            label: row.get("label").unwrap_or_default(),
            created_at: row.get("created_at").unwrap_or_default(),
        }))
    }

    /// Look up the edge keyed by (source, type, target).
    pub async fn find_edge(
        &self,
        source: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>, GraphError> {
        let rel_type = sanitize::rel_type(rel_type).value;
        let cypher = format!(
            "MATCH (a:Entity {{name: $source}})-[r:`{rel_type}`]->(b:Entity {{name: $target}})
             RETURN r.reasoning AS reasoning, r.context AS context, r.date AS date,
                    r.start_date AS start_date, r.end_date AS end_date,
                    r.source_files AS source_files,
                    r.created_at AS created_at, r.updated_at AS updated_at"
        );

        let q = query(&cypher)
            .param("source", source.to_string())
            .param("target", target.to_string());

        let Some(row) = self.query_one(q).await? else {
            return Ok(None);
        };

        let mut properties = BTreeMap::new();
        for key in Relationship::PROPERTY_KEYS {
            if let Ok(v) = row.get::<String>(key) {
                properties.insert(key.to_string(), PropertyValue::Text(v));
            }
        }

        Ok(Some(EdgeRecord {
            source: source.to_string(),
            target: target.to_string(),
            rel_type,
            properties,
            source_files: row.get("source_files").unwrap_or_default(),
            created_at: row.get("created_at").unwrap_or_default(),
            updated_at: row.get("updated_at").unwrap_or_default(),
        }))
    }

    /// Count entity nodes.
    pub async fn count_entities(&self) -> Result<i64, GraphError> {
        let q = query("MATCH (n:Entity) RETURN count(n) AS cnt");
        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Count edges between entity nodes.
    pub async fn count_relationships(&self) -> Result<i64, GraphError> {
        let q = query("MATCH (:Entity)-[r]->(:Entity) RETURN count(r) AS cnt");
        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }
}
