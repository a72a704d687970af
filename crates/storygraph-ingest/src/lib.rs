//! storygraph-ingest: document pipeline for the storygraph knowledge graph.
//!
//! Loads documents, asks an extraction backend for entities and
//! relationships, resolves names through the canonical registry and merges
//! the result into Neo4j. Batches run on a bounded worker pool and every
//! document run is journaled for replay.

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod extraction;
pub mod prefilter;
pub mod processor;
pub mod replay;

pub use batch::{BatchReport, BatchRunner, DocumentFailure};
pub use document::Document;
pub use error::{ExtractionError, ProcessError};
pub use extraction::{ExtractionBackend, ExtractionRequest, HttpExtractionBackend, SidecarBackend};
pub use prefilter::{CapitalizedSpanDetector, NameDetector};
pub use processor::{DocumentProcessor, ProcessedDocument};
