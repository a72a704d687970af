//! storygraph-graph: merge engine for the Neo4j knowledge graph.
//!
//! This crate is the single mutation point for the property graph. Resolved
//! fragments are merged with idempotent, evidence-accumulating semantics:
//! nodes are keyed by canonical name and never relabelled, edges are keyed by
//! (source, type, target) and collect the ids of every document that
//! asserted them.

pub mod client;
pub mod cypher;
pub mod memory;
pub mod merge;
pub mod mutations;
pub mod queries;
pub mod sanitize;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::MemoryGraph;
pub use merge::{ItemFailure, MergeEngine, MergeReport};
pub use store::{EdgeOutcome, EdgeRecord, GraphStore, NodeRecord};
