//! Error types for the storygraph-ingest crate.

use std::time::Duration;

use thiserror::Error;

use storygraph_core::MergePhase;

/// The extraction backend could not produce a usable fragment.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction backend request failed: {0}")]
    Transport(String),

    #[error("Extraction backend returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unusable extraction output: {0}")]
    Unusable(#[from] storygraph_core::CoreError),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction input unavailable: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Why a single document could not be processed.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Document {document_id}: {source}")]
    Extraction {
        document_id: String,
        #[source]
        source: ExtractionError,
    },

    #[error("Document {document_id}: merge stopped in phase {phase:?}")]
    Merge {
        document_id: String,
        phase: MergePhase,
    },

    #[error("Document {document_id} timed out after {after:?}")]
    Timeout { document_id: String, after: Duration },

    #[error("Cannot read document {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for document {document_id} panicked: {message}")]
    Worker { document_id: String, message: String },
}

impl ProcessError {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Extraction { document_id, .. }
            | Self::Merge { document_id, .. }
            | Self::Timeout { document_id, .. }
            | Self::Worker { document_id, .. } => document_id,
            Self::Read { path, .. } => path,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
