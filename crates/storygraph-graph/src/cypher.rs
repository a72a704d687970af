//! Render a merge pass as a standalone Cypher script.
//!
//! Used for dry runs: the script performs the same upserts as
//! [`crate::MergeEngine`] but with every value inlined as a sanitized
//! literal, so it can be reviewed or replayed through `cypher-shell`.

use storygraph_core::KgFragment;

use crate::sanitize::{self, literal, quote};

const NOW: &str = "toString(datetime())";

/// One statement per entity and per relationship, schema first.
pub fn render_script(fragment: &KgFragment, source_id: Option<&str>) -> Vec<String> {
    let mut statements = Vec::with_capacity(1 + fragment.entities.len() + fragment.relationships.len());
    statements.push(
        "CREATE CONSTRAINT entity_name_unique IF NOT EXISTS FOR (n:Entity) REQUIRE n.name IS UNIQUE;"
            .to_string(),
    );

    for entity in &fragment.entities {
        let label = sanitize::label(entity.label.as_str()).value;
        statements.push(format!(
            "MERGE (n:Entity {{name: {name}}}) ON CREATE SET n:`{label}`, n.label = {label_lit}, n.created_at = {NOW};",
            name = quote(&entity.name),
            label_lit = quote(&label),
        ));
    }

    let source = source_id.filter(|s| !s.is_empty()).map(quote);
    for rel in &fragment.relationships {
        let rel_type = sanitize::rel_type(&rel.rel_type).value;
        let (on_create_files, on_match_files) = match &source {
            Some(id) => (
                format!("[{id}]"),
                format!(
                    "CASE WHEN {id} IN coalesce(r.source_files, []) THEN coalesce(r.source_files, []) \
                     ELSE coalesce(r.source_files, []) + {id} END"
                ),
            ),
            None => ("[]".to_string(), "coalesce(r.source_files, [])".to_string()),
        };

        let mut stmt = format!(
            "MATCH (a:Entity {{name: {src}}}) MATCH (b:Entity {{name: {dst}}}) \
             MERGE (a)-[r:`{rel_type}`]->(b) \
             ON CREATE SET r.source_files = {on_create_files}, r.created_at = {NOW}, r.updated_at = {NOW} \
             ON MATCH SET r.source_files = {on_match_files}, r.updated_at = {NOW}",
            src = quote(&rel.source),
            dst = quote(&rel.target),
        );
        let props = rel.properties();
        if !props.is_empty() {
            let assignments: Vec<String> = props
                .iter()
                .map(|(key, value)| format!("r.{key} = {}", literal(value)))
                .collect();
            stmt.push_str(" SET ");
            stmt.push_str(&assignments.join(", "));
        }
        stmt.push(';');
        statements.push(stmt);
    }

    statements
}
