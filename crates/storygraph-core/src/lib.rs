//! storygraph-core: Shared data model for the storygraph pipeline.
//!
//! This crate provides the types exchanged between the pipeline stages:
//! - Extracted entities and relationships, grouped into a [`KgFragment`]
//! - Document identifiers used as edge provenance
//! - The per-document merge phase state machine
//! - Fragment validation errors

pub mod error;
pub mod phase;
pub mod types;

pub use error::CoreError;
pub use phase::MergePhase;
pub use types::{
    DocumentId, EdgeProperties, Entity, EntityLabel, KgFragment, PropertyValue, Relationship,
};
