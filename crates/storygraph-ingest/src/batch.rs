//! Bounded parallel document processing.
//!
//! Spawns one tokio task per document; a semaphore caps how many run at
//! once. Every document gets its own time budget and its own journal entry,
//! and a failing document never affects the others.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;

use storygraph_journal::{DocumentRun, JournalStore, RunId, RunRecorder};

use crate::document::Document;
use crate::error::ProcessError;
use crate::processor::DocumentProcessor;

/// A document that did not make it through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub error: String,
    /// Journal entry holding the payload needed to replay it.
    pub run_id: Option<RunId>,
}

/// Outcome of one batch.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<DocumentFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Where a task gets its document from.
enum Source {
    Loaded(Document),
    Path(PathBuf),
}

impl Source {
    fn label(&self) -> String {
        match self {
            Self::Loaded(doc) => doc.id.to_string(),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

pub struct BatchRunner {
    processor: Arc<DocumentProcessor>,
    journal: Option<Arc<dyn JournalStore>>,
    concurrency: Arc<Semaphore>,
    document_timeout: Option<Duration>,
}

impl BatchRunner {
    pub fn new(processor: Arc<DocumentProcessor>, max_workers: usize) -> Self {
        Self {
            processor,
            journal: None,
            concurrency: Arc::new(Semaphore::new(max_workers.max(1))),
            document_timeout: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_document_timeout(mut self, timeout: Duration) -> Self {
        self.document_timeout = Some(timeout);
        self
    }

    /// Process already loaded documents.
    pub async fn run(&self, documents: Vec<Document>) -> BatchReport {
        self.run_sources(documents.into_iter().map(Source::Loaded).collect())
            .await
    }

    /// Load and process documents from disk. Unreadable files are reported
    /// as failures like any other.
    pub async fn run_paths(&self, paths: Vec<PathBuf>) -> BatchReport {
        self.run_sources(paths.into_iter().map(Source::Path).collect())
            .await
    }

    async fn run_sources(&self, sources: Vec<Source>) -> BatchReport {
        let mut handles = Vec::with_capacity(sources.len());

        for source in sources {
            let label = source.label();
            let processor = self.processor.clone();
            let journal = self.journal.clone();
            let semaphore = self.concurrency.clone();
            let timeout = self.document_timeout;

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return Err(DocumentFailure {
                            document_id: source.label(),
                            error: e.to_string(),
                            run_id: None,
                        })
                    }
                };
                run_one(&processor, journal.as_deref(), source, timeout).await
            });
            handles.push((label, handle));
        }

        tracing::info!(documents = handles.len(), "Batch started");

        let mut report = BatchReport::default();
        for (label, handle) in handles {
            match handle.await {
                Ok(Ok(document_id)) => report.succeeded.push(document_id),
                Ok(Err(failure)) => report.failed.push(failure),
                Err(e) => {
                    tracing::error!(document_id = %label, error = %e, "Document task panicked");
                    report.failed.push(DocumentFailure {
                        document_id: label,
                        error: e.to_string(),
                        run_id: None,
                    });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch complete"
        );
        report
    }
}

/// Process a single document under its time budget and journal the run.
async fn run_one(
    processor: &DocumentProcessor,
    journal: Option<&dyn JournalStore>,
    source: Source,
    timeout: Option<Duration>,
) -> Result<String, DocumentFailure> {
    let document = match source {
        Source::Loaded(doc) => doc,
        Source::Path(path) => match Document::load(&path).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Document unreadable");
                return Err(DocumentFailure {
                    document_id: path.display().to_string(),
                    error: e.to_string(),
                    run_id: None,
                });
            }
        },
    };
    let document_id = document.id.to_string();
    let mut recorder = RunRecorder::new(document.id.clone());
    let run_id = recorder.id();

    let outcome = match timeout {
        Some(limit) => {
            match tokio::time::timeout(limit, processor.process_recorded(&document, &mut recorder))
                .await
            {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(ProcessError::Timeout {
                    document_id: document_id.clone(),
                    after: limit,
                }),
            }
        }
        None => processor
            .process_recorded(&document, &mut recorder)
            .await
            .map(|_| ()),
    };

    let run = match &outcome {
        Ok(()) => recorder.finish_succeeded(),
        Err(ProcessError::Timeout { after, .. }) => recorder.finish_timed_out(*after),
        Err(e) => recorder.finish_failed(e),
    };
    let journaled = save_run(journal, run, &document_id);

    match outcome {
        Ok(()) => Ok(document_id),
        Err(e) => {
            tracing::error!(
                document_id = %document_id,
                run_id = %run_id,
                error = %e,
                "Document failed"
            );
            Err(DocumentFailure {
                document_id,
                error: e.to_string(),
                run_id: journaled.then_some(run_id),
            })
        }
    }
}

/// Returns whether the run was persisted.
fn save_run(
    journal: Option<&dyn JournalStore>,
    run: Result<DocumentRun, serde_json::Error>,
    document_id: &str,
) -> bool {
    let Some(journal) = journal else {
        return false;
    };
    let result = run
        .map_err(storygraph_journal::JournalError::from)
        .and_then(|run| journal.save(&run));
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(document_id = %document_id, error = %e, "Failed to journal run");
            false
        }
    }
}
