//! BLAKE3 content hashing for tamper evidence.
//!
//! Computes a deterministic hash of all run fields (excluding the
//! content_hash itself) so that any modification is detectable.

use chrono::{DateTime, Utc};
use serde::Serialize;

use storygraph_core::{DocumentId, KgFragment, MergePhase};

use crate::{DocumentRun, RunId, RunOutcome};

/// Hashable representation of a run (excludes content_hash).
#[derive(Serialize)]
struct HashableRun<'a> {
    id: &'a RunId,
    document_id: &'a DocumentId,
    started_at: &'a DateTime<Utc>,
    completed_at: &'a Option<DateTime<Utc>>,
    phase: &'a MergePhase,
    outcome: &'a Option<RunOutcome>,
    error: &'a Option<String>,
    context: &'a [String],
    extracted: &'a Option<KgFragment>,
    resolved: &'a Option<KgFragment>,
    merge_report: &'a serde_json::Value,
}

/// Serialize all fields except `content_hash` to JSON and hash the bytes.
/// Returns the hex-encoded hash.
pub fn compute_run_hash(run: &DocumentRun) -> Result<String, serde_json::Error> {
    let hashable = HashableRun {
        id: &run.id,
        document_id: &run.document_id,
        started_at: &run.started_at,
        completed_at: &run.completed_at,
        phase: &run.phase,
        outcome: &run.outcome,
        error: &run.error,
        context: &run.context,
        extracted: &run.extracted,
        resolved: &run.resolved,
        merge_report: &run.merge_report,
    };

    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, &hashable)?;
    Ok(hasher.finalize().to_hex().to_string())
}
