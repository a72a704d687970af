//! Per-document pipeline.
//!
//! detect names → registry context → extraction → registry resolution →
//! graph merge. Each step's output is written to the run recorder as soon
//! as it exists, so a failure later on still leaves a replayable record.

use std::sync::Arc;
use std::time::Duration;

use storygraph_core::{DocumentId, KgFragment};
use storygraph_graph::{MergeEngine, MergeReport};
use storygraph_journal::RunRecorder;
use storygraph_registry::{ContextMatch, NameRegistry};

use crate::document::Document;
use crate::error::{ExtractionError, ProcessError, Result};
use crate::extraction::{ExtractionBackend, ExtractionRequest};
use crate::prefilter::NameDetector;

/// What one successful pass produced.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document_id: DocumentId,
    pub context: Vec<ContextMatch>,
    pub extracted: KgFragment,
    pub resolved: KgFragment,
    pub report: MergeReport,
}

pub struct DocumentProcessor {
    registry: Arc<NameRegistry>,
    detector: Arc<dyn NameDetector>,
    backend: Arc<dyn ExtractionBackend>,
    engine: Arc<MergeEngine>,
    extraction_timeout: Option<Duration>,
}

impl DocumentProcessor {
    pub fn new(
        registry: Arc<NameRegistry>,
        detector: Arc<dyn NameDetector>,
        backend: Arc<dyn ExtractionBackend>,
        engine: Arc<MergeEngine>,
    ) -> Self {
        Self {
            registry,
            detector,
            backend,
            engine,
            extraction_timeout: None,
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<MergeEngine> {
        &self.engine
    }

    /// Run the full pipeline for one document.
    pub async fn process(&self, document: &Document) -> Result<ProcessedDocument> {
        let mut recorder = RunRecorder::new(document.id.clone());
        self.process_recorded(document, &mut recorder).await
    }

    /// Run the full pipeline, recording every intermediate result.
    pub async fn process_recorded(
        &self,
        document: &Document,
        recorder: &mut RunRecorder,
    ) -> Result<ProcessedDocument> {
        let document_id = document.id.to_string();

        let names = self.detector.detect(&document.text);
        let context = self.known_entities(&document_id, names).await?;
        recorder.set_context(context.iter().map(|c| c.matched.clone()).collect());
        tracing::debug!(
            document_id = %document_id,
            known = context.len(),
            "Registry context assembled"
        );

        let request = ExtractionRequest::new(document, context.clone());
        let extracted = self
            .extract(&request)
            .await
            .map_err(|source| ProcessError::Extraction {
                document_id: document_id.clone(),
                source,
            })?;
        recorder.record_extracted(&extracted);

        let resolved = self.resolve(&document_id, extracted.clone()).await?;
        recorder.record_resolved(&resolved);

        let report = self.engine.merge(&resolved, Some(document_id.as_str())).await;
        recorder.set_phase(report.phase);
        recorder.record_report(&report);

        if !report.is_done() {
            return Err(ProcessError::Merge {
                document_id,
                phase: report.phase,
            });
        }

        tracing::info!(
            document_id = %document_id,
            entities = report.entities_upserted,
            edges_created = report.edges_created,
            edges_merged = report.edges_merged,
            skipped = report.edges_skipped.len(),
            "Document merged"
        );

        Ok(ProcessedDocument {
            document_id: document.id.clone(),
            context,
            extracted,
            resolved,
            report,
        })
    }

    async fn extract(&self, request: &ExtractionRequest) -> std::result::Result<KgFragment, ExtractionError> {
        let call = self.backend.extract(request);
        match self.extraction_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExtractionError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Registry lookups hit SQLite, so they run on the blocking pool.
    async fn known_entities(
        &self,
        document_id: &str,
        names: Vec<String>,
    ) -> Result<Vec<ContextMatch>> {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || {
            let threshold = registry.threshold();
            registry.context_for(&names, threshold)
        })
        .await
        .map_err(|e| ProcessError::Worker {
            document_id: document_id.to_string(),
            message: e.to_string(),
        })
    }

    async fn resolve(&self, document_id: &str, extracted: KgFragment) -> Result<KgFragment> {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || registry.merge_fragment(&extracted))
            .await
            .map_err(|e| ProcessError::Worker {
                document_id: document_id.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use storygraph_core::phase::FailedAfter;
    use storygraph_core::MergePhase;
    use storygraph_graph::{GraphStore, MemoryGraph};
    use storygraph_registry::{MatchPolicy, MemoryRegistryStore, RegistryStore};

    use super::*;
    use crate::prefilter::CapitalizedSpanDetector;

    /// Returns canned fragments keyed by document id and remembers what it
    /// was asked.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub fragments: HashMap<String, String>,
        pub delay: Option<Duration>,
        pub seen: Mutex<Vec<ExtractionRequest>>,
    }

    impl ScriptedBackend {
        pub fn with(mut self, document_id: &str, json: &str) -> Self {
            self.fragments.insert(document_id.to_string(), json.to_string());
            self
        }
    }

    #[async_trait]
    impl ExtractionBackend for ScriptedBackend {
        async fn extract(
            &self,
            request: &ExtractionRequest,
        ) -> std::result::Result<KgFragment, ExtractionError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let raw = self
                .fragments
                .get(request.document_id.as_str())
                .ok_or_else(|| ExtractionError::Transport("no scripted fragment".into()))?;
            Ok(KgFragment::from_json(raw)?)
        }
    }

    pub(crate) const PUTIN_DOC: &str = r#"{
        "entities": [
            {"name": "Владимир Путин", "label": "Person", "description": "Политик"},
            {"name": "Премьер-министр России", "label": "Role"}
        ],
        "relationships": [
            {"source": "Владимир Путин", "target": "Премьер-министр России",
             "type": "HELD_POSITION", "reasoning": "назначен", "context": "...",
             "date": "2008-05-08"}
        ]
    }"#;

    pub(crate) fn processor(
        backend: ScriptedBackend,
        graph: Arc<MemoryGraph>,
    ) -> (DocumentProcessor, Arc<ScriptedBackend>) {
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryRegistryStore::new());
        let registry = Arc::new(NameRegistry::open(store, MatchPolicy::default()).unwrap());
        let backend = Arc::new(backend);
        let processor = DocumentProcessor::new(
            registry,
            Arc::new(CapitalizedSpanDetector::default()),
            backend.clone(),
            Arc::new(MergeEngine::new(graph as Arc<dyn GraphStore>)),
        );
        (processor, backend)
    }

    #[tokio::test]
    async fn test_two_documents_accumulate_provenance() {
        let graph = Arc::new(MemoryGraph::new());
        let backend = ScriptedBackend::default()
            .with("doc1", PUTIN_DOC)
            .with("doc2", PUTIN_DOC);
        let (processor, _) = processor(backend, graph.clone());

        processor
            .process(&Document::new("doc1", "a", "Владимир Путин назначен"))
            .await
            .unwrap();
        let second = processor
            .process(&Document::new("doc2", "b", "Путин снова премьер"))
            .await
            .unwrap();

        assert_eq!(second.report.edges_merged, 1);
        assert_eq!(graph.count_nodes().await.unwrap(), 2);
        let edges = graph.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, "владимир путин");
        assert_eq!(edges[0].source_files, vec!["doc1", "doc2"]);
    }

    #[tokio::test]
    async fn test_known_names_are_sent_as_context() {
        let graph = Arc::new(MemoryGraph::new());
        let backend = ScriptedBackend::default()
            .with("doc1", PUTIN_DOC)
            .with("doc2", r#"{"entities": [], "relationships": []}"#);
        let (processor, backend) = processor(backend, graph);

        processor
            .process(&Document::new("doc1", "a", "text"))
            .await
            .unwrap();
        let second = processor
            .process(&Document::new("doc2", "b", "Видели, как Путин приехал в Кремль"))
            .await
            .unwrap();

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].known_entities.is_empty());
        assert_eq!(second.context.len(), 1);
        assert_eq!(seen[1].known_entities[0].matched, "владимир путин");
        assert_eq!(seen[1].known_entities[0].description.as_deref(), Some("Политик"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let graph = Arc::new(MemoryGraph::new());
        let backend = ScriptedBackend::default().with("doc1", PUTIN_DOC);
        let (processor, _) = processor(backend, graph.clone());
        let doc = Document::new("doc1", "a", "text");

        processor.process(&doc).await.unwrap();
        let nodes = graph.nodes();
        processor.process(&doc).await.unwrap();

        assert_eq!(graph.nodes(), nodes);
        assert_eq!(graph.edges()[0].source_files, vec!["doc1"]);
        assert_eq!(processor.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported_with_document_id() {
        let graph = Arc::new(MemoryGraph::new());
        let (processor, _) = processor(ScriptedBackend::default(), graph.clone());

        let err = processor
            .process(&Document::new("doc9", "a", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Extraction { .. }));
        assert_eq!(err.document_id(), "doc9");
        assert_eq!(graph.count_nodes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extraction_timeout() {
        let graph = Arc::new(MemoryGraph::new());
        let backend = ScriptedBackend {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedBackend::default().with("doc1", PUTIN_DOC)
        };
        let (processor, _) = processor(backend, graph);
        let processor = processor.with_extraction_timeout(Duration::from_millis(10));

        let err = processor
            .process(&Document::new("doc1", "a", "text"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Extraction {
                source: ExtractionError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_graph_outage_is_recorded_for_replay() {
        let graph = Arc::new(MemoryGraph::new());
        graph.set_offline(true);
        let backend = ScriptedBackend::default().with("doc1", PUTIN_DOC);
        let (processor, _) = processor(backend, graph);
        let doc = Document::new("doc1", "a", "text");

        let mut recorder = RunRecorder::new(doc.id.clone());
        let err = processor
            .process_recorded(&doc, &mut recorder)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Merge {
                phase: MergePhase::Failed {
                    after: FailedAfter::Pending
                },
                ..
            }
        ));

        let run = recorder.finish_failed(&err).unwrap();
        let fragment = run.replayable_fragment().unwrap();
        assert_eq!(fragment.entities[0].name, "владимир путин");
    }
}
