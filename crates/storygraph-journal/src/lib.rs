//! storygraph-journal: tamper-evident record of document runs.
//!
//! Every document the pipeline touches gets a [`DocumentRun`]: the names
//! passed to the extraction backend as context, the fragment it returned,
//! the resolved fragment that was merged, the merge report and the final
//! phase. Runs are content-hashed with BLAKE3 and written as JSON so a
//! failed document can be inspected and replayed without re-extraction.

pub mod hash;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storygraph_core::{DocumentId, KgFragment, MergePhase};

pub use session::RunRecorder;
pub use store::{FileJournalStore, JournalError, JournalStore, RunQuery};

// ── Core Types ───────────────────────────────────────────────────

/// Unique identifier for one processing run of one document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The merge pass reached `Done`.
    Succeeded,
    /// Extraction or merge failed; see `error`.
    Failed,
    /// The document was abandoned after its time budget.
    TimedOut,
}

/// The complete record of one document run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRun {
    pub id: RunId,
    pub document_id: DocumentId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phase: MergePhase,
    pub outcome: Option<RunOutcome>,
    pub error: Option<String>,
    /// Registry names supplied to the extraction backend.
    pub context: Vec<String>,
    /// Fragment as returned by the extraction backend.
    pub extracted: Option<KgFragment>,
    /// Fragment after canonical name resolution; this is what gets merged.
    pub resolved: Option<KgFragment>,
    /// Serialized merge report of the last merge pass.
    pub merge_report: serde_json::Value,
    /// BLAKE3 content hash (hex), set on finalization.
    pub content_hash: Option<String>,
}

impl DocumentRun {
    /// Compute the BLAKE3 hash over every field except `content_hash`.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        hash::compute_run_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match (&self.content_hash, self.compute_hash()) {
            (Some(stored), Ok(fresh)) => *stored == fresh,
            _ => false,
        }
    }

    /// The fragment a replay should merge, if the run got that far.
    pub fn replayable_fragment(&self) -> Option<&KgFragment> {
        self.resolved.as_ref().or(self.extracted.as_ref())
    }
}
