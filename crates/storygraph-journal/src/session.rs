//! Builder-style recorder for document runs.
//!
//! The document processor feeds the recorder as the run progresses:
//!
//! ```no_run
//! # use storygraph_journal::RunRecorder;
//! # use storygraph_core::{DocumentId, KgFragment, MergePhase};
//! let mut recorder = RunRecorder::new(DocumentId::from("doc1"));
//! recorder.set_context(vec!["владимир путин".to_string()]);
//! recorder.record_extracted(&KgFragment::default());
//! recorder.record_resolved(&KgFragment::default());
//! recorder.set_phase(MergePhase::Done);
//! let run = recorder.finish_succeeded().unwrap();
//! assert!(run.verify_integrity());
//! ```

use chrono::Utc;
use serde::Serialize;

use storygraph_core::{DocumentId, KgFragment, MergePhase};

use crate::{DocumentRun, RunId, RunOutcome};

/// Records one document run incrementally.
pub struct RunRecorder {
    run: DocumentRun,
}

impl RunRecorder {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            run: DocumentRun {
                id: RunId::new(),
                document_id,
                started_at: Utc::now(),
                completed_at: None,
                phase: MergePhase::Pending,
                outcome: None,
                error: None,
                context: Vec::new(),
                extracted: None,
                resolved: None,
                merge_report: serde_json::Value::Null,
                content_hash: None,
            },
        }
    }

    /// The run ID (available before finalization).
    pub fn id(&self) -> RunId {
        self.run.id
    }

    pub fn set_context(&mut self, names: Vec<String>) {
        self.run.context = names;
    }

    pub fn record_extracted(&mut self, fragment: &KgFragment) {
        self.run.extracted = Some(fragment.clone());
    }

    pub fn record_resolved(&mut self, fragment: &KgFragment) {
        self.run.resolved = Some(fragment.clone());
    }

    pub fn set_phase(&mut self, phase: MergePhase) {
        self.run.phase = phase;
    }

    /// Attach a merge report. A report that cannot be serialized is recorded
    /// as its error text.
    pub fn record_report<R: Serialize>(&mut self, report: &R) {
        self.run.merge_report = serde_json::to_value(report)
            .unwrap_or_else(|e| serde_json::Value::String(format!("unserializable report: {e}")));
    }

    pub fn finish_succeeded(self) -> Result<DocumentRun, serde_json::Error> {
        self.finalize(RunOutcome::Succeeded, None)
    }

    pub fn finish_failed(self, error: impl std::fmt::Display) -> Result<DocumentRun, serde_json::Error> {
        self.finalize(RunOutcome::Failed, Some(error.to_string()))
    }

    pub fn finish_timed_out(self, after: std::time::Duration) -> Result<DocumentRun, serde_json::Error> {
        self.finalize(
            RunOutcome::TimedOut,
            Some(format!("timed out after {}s", after.as_secs_f64())),
        )
    }

    /// Set completed_at and outcome, then compute the content hash.
    fn finalize(
        mut self,
        outcome: RunOutcome,
        error: Option<String>,
    ) -> Result<DocumentRun, serde_json::Error> {
        self.run.completed_at = Some(Utc::now());
        self.run.outcome = Some(outcome);
        self.run.error = error;
        let hash = self.run.compute_hash()?;
        self.run.content_hash = Some(hash);
        Ok(self.run)
    }
}
