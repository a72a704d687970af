//! Re-merge a journaled run without calling the extraction backend.

use std::sync::Arc;

use storygraph_graph::{MergeEngine, MergeReport};
use storygraph_journal::{JournalError, JournalStore, RunId, RunRecorder};
use storygraph_registry::NameRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Run {0} never produced a fragment; the document must be re-ingested")]
    NothingToReplay(RunId),

    #[error("Registry worker for run {run_id} failed: {message}")]
    Worker { run_id: RunId, message: String },
}

/// Replay run `id` and journal the replay as a new run.
///
/// A run that stopped after its entities were merged only retries the
/// relationship phase. A run that never got past extraction resolution is
/// resolved against the registry first.
pub async fn replay_run(
    journal: &dyn JournalStore,
    registry: &Arc<NameRegistry>,
    engine: &MergeEngine,
    id: RunId,
) -> Result<MergeReport, ReplayError> {
    let run = journal.get(id)?;
    let mut recorder = RunRecorder::new(run.document_id.clone());
    recorder.set_context(run.context.clone());

    let resolved = match (&run.resolved, &run.extracted) {
        (Some(resolved), _) => resolved.clone(),
        (None, Some(extracted)) => {
            recorder.record_extracted(extracted);
            let registry = Arc::clone(registry);
            let extracted = extracted.clone();
            tokio::task::spawn_blocking(move || registry.merge_fragment(&extracted))
                .await
                .map_err(|e| ReplayError::Worker {
                    run_id: id,
                    message: e.to_string(),
                })?
        }
        (None, None) => return Err(ReplayError::NothingToReplay(id)),
    };
    recorder.record_resolved(&resolved);

    let source_id = run.document_id.as_str();
    let edges_only = run.resolved.is_some() && run.phase.can_retry_edges();
    tracing::info!(
        document_id = %source_id,
        run_id = %id,
        edges_only,
        "Replaying journaled run"
    );

    let report = if edges_only {
        engine.merge_relationships(&resolved, Some(source_id)).await
    } else {
        engine.merge(&resolved, Some(source_id)).await
    };
    recorder.set_phase(report.phase);
    recorder.record_report(&report);

    let replayed = if report.is_done() {
        recorder.finish_succeeded()
    } else {
        recorder.finish_failed(format!("replay of run {id} stopped in phase {:?}", report.phase))
    }
    .map_err(JournalError::from)?;
    journal.save(&replayed)?;

    Ok(report)
}
