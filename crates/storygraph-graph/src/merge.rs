//! Merge pass: turns a resolved fragment into graph upserts.
//!
//! Entities are always upserted before relationships. Item-level failures
//! (one entity, one relationship) are recorded in the [`MergeReport`] and the
//! pass continues; the report's [`MergePhase`] says how far the document got.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use storygraph_core::{KgFragment, MergePhase};

use crate::client::GraphError;
use crate::sanitize;
use crate::store::{EdgeOutcome, GraphStore};

/// One entity or relationship that did not make it into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

/// Outcome of merging one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub phase: MergePhase,
    pub entities_upserted: usize,
    pub entity_failures: Vec<ItemFailure>,
    pub edges_created: usize,
    pub edges_merged: usize,
    /// Relationships dropped because an endpoint node was missing.
    pub edges_skipped: Vec<ItemFailure>,
    /// Relationships that hit a store-level error; retryable.
    pub edge_failures: Vec<ItemFailure>,
    /// Labels or relationship types replaced by their fallback.
    pub fallbacks: usize,
}

impl MergeReport {
    fn new(phase: MergePhase) -> Self {
        Self {
            phase,
            entities_upserted: 0,
            entity_failures: Vec::new(),
            edges_created: 0,
            edges_merged: 0,
            edges_skipped: Vec::new(),
            edge_failures: Vec::new(),
            fallbacks: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == MergePhase::Done
    }
}

pub struct MergeEngine {
    store: Arc<dyn GraphStore>,
    op_timeout: Option<Duration>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            op_timeout: None,
        }
    }

    /// Bound every individual store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Merge a resolved fragment, attributing its edges to `source_id`.
    pub async fn merge(&self, fragment: &KgFragment, source_id: Option<&str>) -> MergeReport {
        let mut report = MergeReport::new(MergePhase::Pending);

        for entity in &fragment.entities {
            let label = sanitize::label(entity.label.as_str());
            if label.fell_back {
                report.fallbacks += 1;
            }
            let result = self
                .timed(
                    "upsert_entity",
                    self.store.upsert_entity(&entity.name, &label.value),
                )
                .await;
            match result {
                Ok(()) => report.entities_upserted += 1,
                Err(e) => {
                    tracing::warn!(
                        entity = %entity.name,
                        source_id = source_id.unwrap_or_default(),
                        error = %e,
                        "Entity upsert failed"
                    );
                    report.entity_failures.push(ItemFailure {
                        item: entity.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !fragment.entities.is_empty() && report.entities_upserted == 0 {
            report.phase = report.phase.fail();
            tracing::error!(
                source_id = source_id.unwrap_or_default(),
                failures = report.entity_failures.len(),
                "Every entity upsert failed"
            );
            return report;
        }
        report.phase = report.phase.advance();

        self.relationships_pass(fragment, source_id, &mut report)
            .await;
        report
    }

    /// Retry only the relationship phase of a document whose entities are
    /// already persisted.
    pub async fn merge_relationships(
        &self,
        fragment: &KgFragment,
        source_id: Option<&str>,
    ) -> MergeReport {
        let mut report = MergeReport::new(MergePhase::EntitiesMerged);
        self.relationships_pass(fragment, source_id, &mut report)
            .await;
        report
    }

    async fn relationships_pass(
        &self,
        fragment: &KgFragment,
        source_id: Option<&str>,
        report: &mut MergeReport,
    ) {
        for rel in &fragment.relationships {
            let rel_type = sanitize::rel_type(&rel.rel_type);
            if rel_type.fell_back {
                report.fallbacks += 1;
            }
            let item = format!("{} -[{}]-> {}", rel.source, rel_type.value, rel.target);
            let props = rel.properties();
            let result = self
                .timed(
                    "upsert_relationship",
                    self.store.upsert_relationship(
                        &rel.source,
                        &rel.target,
                        &rel_type.value,
                        &props,
                        source_id,
                    ),
                )
                .await;

            match result {
                Ok(EdgeOutcome::Created) => report.edges_created += 1,
                Ok(EdgeOutcome::Merged) => report.edges_merged += 1,
                Err(e) if e.is_item_level() => {
                    tracing::warn!(
                        relationship = %item,
                        source_id = source_id.unwrap_or_default(),
                        error = %e,
                        "Relationship skipped"
                    );
                    report.edges_skipped.push(ItemFailure {
                        item,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(
                        relationship = %item,
                        source_id = source_id.unwrap_or_default(),
                        error = %e,
                        "Relationship upsert failed"
                    );
                    report.edge_failures.push(ItemFailure {
                        item,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.edge_failures.is_empty() {
            report.phase = report.phase.advance().advance();
        } else {
            report.phase = report.phase.fail();
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, GraphError>>,
    ) -> Result<T, GraphError> {
        match self.op_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| GraphError::Timeout {
                    operation,
                    millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use storygraph_core::{EdgeProperties, Entity, EntityLabel, Relationship};
    use storygraph_core::phase::FailedAfter;

    use super::*;
    use crate::memory::MemoryGraph;
    use crate::store::{EdgeRecord, NodeRecord};

    const PUTIN: &str = "Владимир Путин";
    const PM: &str = "Премьер-министр России";

    fn putin_fragment() -> KgFragment {
        KgFragment {
            entities: vec![
                Entity::new(PUTIN, EntityLabel::Person),
                Entity::new(PM, EntityLabel::Role),
            ],
            relationships: vec![Relationship::new(PUTIN, PM, "HELD_POSITION").with_date("2008-05-08")],
        }
    }

    fn engine(graph: &Arc<MemoryGraph>) -> MergeEngine {
        MergeEngine::new(graph.clone() as Arc<dyn GraphStore>)
    }

    #[tokio::test]
    async fn test_provenance_accumulates_across_documents() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);

        let report = engine.merge(&putin_fragment(), Some("doc1")).await;
        assert!(report.is_done());
        assert_eq!(report.entities_upserted, 2);
        assert_eq!(report.edges_created, 1);

        let report = engine.merge(&putin_fragment(), Some("doc2")).await;
        assert!(report.is_done());
        assert_eq!(report.edges_merged, 1);

        assert_eq!(graph.count_nodes().await.unwrap(), 2);
        assert_eq!(graph.count_edges().await.unwrap(), 1);
        let edge = graph
            .get_edge(PUTIN, "HELD_POSITION", PM)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.source_files, vec!["doc1", "doc2"]);
        assert_eq!(edge.properties["date"].as_str(), Some("2008-05-08"));
    }

    #[tokio::test]
    async fn test_remerge_same_document_is_idempotent() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);

        engine.merge(&putin_fragment(), Some("doc1")).await;
        let nodes_before = graph.nodes();
        engine.merge(&putin_fragment(), Some("doc1")).await;

        assert_eq!(graph.nodes(), nodes_before);
        let edges = graph.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_files, vec!["doc1"]);
    }

    #[tokio::test]
    async fn test_source_files_never_shrink() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);

        let mut seen = 0;
        for doc in ["d1", "d2", "d1", "d3", "d2"] {
            engine.merge(&putin_fragment(), Some(doc)).await;
            let edge = graph.get_edge(PUTIN, "HELD_POSITION", PM).await.unwrap().unwrap();
            assert!(edge.source_files.len() >= seen);
            seen = edge.source_files.len();
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_absent_source_id_leaves_list_untouched() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);

        engine.merge(&putin_fragment(), None).await;
        let edge = graph.get_edge(PUTIN, "HELD_POSITION", PM).await.unwrap().unwrap();
        assert!(edge.source_files.is_empty());
    }

    #[tokio::test]
    async fn test_remerge_without_source_id_keeps_provenance() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);

        engine.merge(&putin_fragment(), Some("doc1")).await;
        let first = graph.get_edge(PUTIN, "HELD_POSITION", PM).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = engine.merge(&putin_fragment(), None).await;
        assert!(report.is_done());
        assert_eq!(report.edges_merged, 1);

        let second = graph.get_edge(PUTIN, "HELD_POSITION", PM).await.unwrap().unwrap();
        assert_eq!(second.source_files, vec!["doc1"]);
        assert_eq!(second.created_at, first.created_at);
        let parse = |ts: &str| chrono::DateTime::parse_from_rfc3339(ts).unwrap();
        assert!(parse(&second.updated_at) > parse(&first.updated_at));
    }

    #[tokio::test]
    async fn test_later_properties_overwrite_but_omitted_ones_survive() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);
        engine.merge(&putin_fragment(), Some("doc1")).await;

        let mut fragment = putin_fragment();
        fragment.relationships[0].date = None;
        fragment.relationships[0].reasoning = "второй срок".into();
        engine.merge(&fragment, Some("doc2")).await;

        let edge = graph.get_edge(PUTIN, "HELD_POSITION", PM).await.unwrap().unwrap();
        assert_eq!(edge.properties["date"].as_str(), Some("2008-05-08"));
        assert_eq!(edge.properties["reasoning"].as_str(), Some("второй срок"));
    }

    #[tokio::test]
    async fn test_label_not_changed_by_later_merge() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);
        engine.merge(&putin_fragment(), Some("doc1")).await;

        let relabelled = KgFragment {
            entities: vec![Entity::new(PUTIN, EntityLabel::Organization)],
            relationships: vec![],
        };
        engine.merge(&relabelled, Some("doc2")).await;
        assert_eq!(graph.get_node(PUTIN).await.unwrap().unwrap().label, "Person");
    }

    #[tokio::test]
    async fn test_failed_target_skips_only_that_relationship() {
        let graph = Arc::new(MemoryGraph::new());
        graph.fail_upserts_for(PM);
        let engine = engine(&graph);

        let mut fragment = putin_fragment();
        fragment.entities.push(Entity::new("Россия", EntityLabel::Country));
        fragment
            .relationships
            .push(Relationship::new(PUTIN, "Россия", "CITIZEN_OF"));

        let report = engine.merge(&fragment, Some("doc1")).await;
        assert!(report.is_done());
        assert_eq!(report.entity_failures.len(), 1);
        assert_eq!(report.edges_skipped.len(), 1);
        assert_eq!(report.edges_created, 1);
        assert!(graph.get_edge(PUTIN, "CITIZEN_OF", "Россия").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_all_entities_failing_stops_at_pending() {
        let graph = Arc::new(MemoryGraph::new());
        graph.set_offline(true);
        let engine = engine(&graph);

        let report = engine.merge(&putin_fragment(), Some("doc1")).await;
        assert_eq!(
            report.phase,
            MergePhase::Failed {
                after: FailedAfter::Pending
            }
        );
        assert_eq!(report.entity_failures.len(), 2);
        assert_eq!(report.edges_created + report.edge_failures.len(), 0);
    }

    #[tokio::test]
    async fn test_fallback_tags_are_counted() {
        let graph = Arc::new(MemoryGraph::new());
        let engine = engine(&graph);
        let fragment = KgFragment {
            entities: vec![
                Entity::new("a", "Персона"),
                Entity::new("b", EntityLabel::Person),
            ],
            relationships: vec![Relationship::new("a", "b", "знаком с")],
        };

        let report = engine.merge(&fragment, Some("doc1")).await;
        assert_eq!(report.fallbacks, 2);
        assert_eq!(graph.get_node("a").await.unwrap().unwrap().label, "Entity");
        assert!(graph.get_edge("a", "RELATED_TO", "b").await.unwrap().is_some());
    }

    /// Delegates to a memory graph, optionally failing every edge upsert.
    struct FlakyEdges {
        inner: MemoryGraph,
        fail_edges: AtomicBool,
        delay: Option<Duration>,
    }

    impl FlakyEdges {
        fn new() -> Self {
            Self {
                inner: MemoryGraph::new(),
                fail_edges: AtomicBool::new(false),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl GraphStore for FlakyEdges {
        async fn ensure_schema(&self) -> Result<(), GraphError> {
            self.inner.ensure_schema().await
        }

        async fn upsert_entity(&self, name: &str, label: &str) -> Result<(), GraphError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.upsert_entity(name, label).await
        }

        async fn upsert_relationship(
            &self,
            source: &str,
            target: &str,
            rel_type: &str,
            properties: &EdgeProperties,
            source_id: Option<&str>,
        ) -> Result<EdgeOutcome, GraphError> {
            if self.fail_edges.load(Ordering::SeqCst) {
                return Err(GraphError::Connection("connection reset".into()));
            }
            self.inner
                .upsert_relationship(source, target, rel_type, properties, source_id)
                .await
        }

        async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, GraphError> {
            self.inner.get_node(name).await
        }

        async fn get_edge(
            &self,
            source: &str,
            rel_type: &str,
            target: &str,
        ) -> Result<Option<EdgeRecord>, GraphError> {
            self.inner.get_edge(source, rel_type, target).await
        }

        async fn count_nodes(&self) -> Result<i64, GraphError> {
            self.inner.count_nodes().await
        }

        async fn count_edges(&self) -> Result<i64, GraphError> {
            self.inner.count_edges().await
        }
    }

    #[tokio::test]
    async fn test_edge_phase_failure_is_retryable() {
        let store = Arc::new(FlakyEdges::new());
        store.fail_edges.store(true, Ordering::SeqCst);
        let engine = MergeEngine::new(store.clone() as Arc<dyn GraphStore>);

        let report = engine.merge(&putin_fragment(), Some("doc1")).await;
        assert_eq!(
            report.phase,
            MergePhase::Failed {
                after: FailedAfter::EntitiesMerged
            }
        );
        assert!(report.phase.can_retry_edges());
        assert_eq!(store.count_nodes().await.unwrap(), 2);
        assert_eq!(store.count_edges().await.unwrap(), 0);

        store.fail_edges.store(false, Ordering::SeqCst);
        let retry = engine.merge_relationships(&putin_fragment(), Some("doc1")).await;
        assert!(retry.is_done());
        assert_eq!(retry.edges_created, 1);
        assert_eq!(store.count_nodes().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let mut store = FlakyEdges::new();
        store.delay = Some(Duration::from_millis(200));
        let engine = MergeEngine::new(Arc::new(store) as Arc<dyn GraphStore>)
            .with_timeout(Duration::from_millis(10));

        let report = engine.merge(&putin_fragment(), Some("doc1")).await;
        assert_eq!(
            report.phase,
            MergePhase::Failed {
                after: FailedAfter::Pending
            }
        );
        assert!(report.entity_failures[0].error.contains("timed out"));
    }
}
