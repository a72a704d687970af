//! Run storage: trait and file-backed implementation.
//!
//! Run bodies live under `{root}/YYYY/MM/DD/{run_id}.json`. Every save also
//! appends a line to `{root}/index.jsonl` carrying the fields queries filter
//! on, so lookups read the index instead of walking the tree and only the
//! matching bodies are opened.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storygraph_core::DocumentId;

use crate::{DocumentRun, RunId, RunOutcome};

const INDEX_FILE: &str = "index.jsonl";

/// Errors that can occur during journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Integrity check failed for run {0}: stored hash does not match content")]
    IntegrityViolation(RunId),

    #[error("Run has no content hash (not finalized)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query parameters for listing runs.
#[derive(Debug, Default)]
pub struct RunQuery {
    pub document_id: Option<DocumentId>,
    pub outcome: Option<RunOutcome>,
    /// Only include runs started at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include runs started at or before this time.
    pub to: Option<DateTime<Utc>>,
}

impl RunQuery {
    fn admits(
        &self,
        document_id: &DocumentId,
        outcome: Option<RunOutcome>,
        started_at: DateTime<Utc>,
    ) -> bool {
        self.document_id.as_ref().map_or(true, |d| d == document_id)
            && self.outcome.map_or(true, |o| outcome == Some(o))
            && self.from.map_or(true, |from| started_at >= from)
            && self.to.map_or(true, |to| started_at <= to)
    }
}

/// Trait for run persistence backends.
pub trait JournalStore: Send + Sync {
    /// Store a finalized run. Returns an error if the run has no content hash.
    fn save(&self, run: &DocumentRun) -> Result<(), JournalError>;

    /// Retrieve a run by ID, verifying integrity.
    fn get(&self, id: RunId) -> Result<DocumentRun, JournalError>;

    /// List runs matching the given query, ordered by started_at descending.
    fn list(&self, query: &RunQuery) -> Result<Vec<DocumentRun>, JournalError>;
}

/// One line of `index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexLine {
    run_id: RunId,
    document_id: DocumentId,
    outcome: Option<RunOutcome>,
    started_at: DateTime<Utc>,
    /// Body location relative to the store root.
    path: PathBuf,
}

/// File-system backed journal.
///
/// ```text
/// {root}/
///   index.jsonl
///   2024/
///     01/
///       15/
///         {run_id}.json
/// ```
///
/// Safe to share between the tasks of one process. The index is append-only;
/// a run saved twice is listed once, with its latest body.
pub struct FileJournalStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl FileJournalStore {
    /// Open a journal rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(run: &DocumentRun) -> PathBuf {
        PathBuf::from(format!("{}/{}.json", run.started_at.format("%Y/%m/%d"), run.id))
    }

    /// Index lines, newest last. Lines that do not parse are skipped.
    fn read_index(&self) -> Result<Vec<IndexLine>, JournalError> {
        let path = self.root.join(INDEX_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(line = n + 1, error = %e, "Skipping malformed journal index line");
                    None
                }
            })
            .collect())
    }

    fn append_index(&self, line: &IndexLine) -> Result<(), JournalError> {
        let encoded = serde_json::to_string(line)?;
        let _guard = self.index_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(INDEX_FILE))?;
        writeln!(file, "{encoded}")?;
        Ok(())
    }

    /// Where the latest body of run `id` is stored.
    pub(crate) fn body_path(&self, id: RunId) -> Result<PathBuf, JournalError> {
        self.read_index()?
            .into_iter()
            .rev()
            .find(|line| line.run_id == id)
            .map(|line| self.root.join(line.path))
            .ok_or(JournalError::NotFound(id))
    }

    fn read_body(path: &Path) -> Result<DocumentRun, JournalError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

impl JournalStore for FileJournalStore {
    fn save(&self, run: &DocumentRun) -> Result<(), JournalError> {
        if run.content_hash.is_none() {
            return Err(JournalError::NotFinalized);
        }

        let relative = Self::relative_path(run);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Body first, index second: an indexed run always has a body.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(run)?)?;
        fs::rename(&staging, &path)?;

        self.append_index(&IndexLine {
            run_id: run.id,
            document_id: run.document_id.clone(),
            outcome: run.outcome,
            started_at: run.started_at,
            path: relative,
        })?;

        tracing::debug!(
            run_id = %run.id,
            document_id = %run.document_id,
            path = %path.display(),
            "Run journaled"
        );

        Ok(())
    }

    fn get(&self, id: RunId) -> Result<DocumentRun, JournalError> {
        let run = Self::read_body(&self.body_path(id)?)?;
        if !run.verify_integrity() {
            return Err(JournalError::IntegrityViolation(id));
        }
        Ok(run)
    }

    fn list(&self, query: &RunQuery) -> Result<Vec<DocumentRun>, JournalError> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for line in self.read_index()?.into_iter().rev() {
            if !seen.insert(line.run_id) {
                continue;
            }
            if !query.admits(&line.document_id, line.outcome, line.started_at) {
                continue;
            }
            let path = self.root.join(&line.path);
            let run = match Self::read_body(&path) {
                Ok(run) if run.verify_integrity() => run,
                Ok(_) => {
                    tracing::warn!(run_id = %line.run_id, "Skipping run that fails its integrity check");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run file");
                    continue;
                }
            };
            // The body is authoritative if it disagrees with the index.
            if query.admits(&run.document_id, run.outcome, run.started_at) {
                results.push(run);
            }
        }

        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(results)
    }
}
