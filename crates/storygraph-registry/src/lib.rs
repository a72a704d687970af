//! storygraph-registry: canonical name registry.
//!
//! Every entity name extracted from a document is resolved here before it
//! becomes a graph node key. The registry keeps one normalized entry per
//! real-world entity and decides, by exact, token-subset and fuzzy matching,
//! whether a freshly extracted name refers to something already known.

pub mod matching;
pub mod normalize;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use matching::{MatchKind, MatchPolicy, SimilarityMetric, TieBreak};
pub use normalize::normalize;
pub use registry::{ContextMatch, NameRegistry};
pub use sqlite::SqliteRegistryStore;
pub use store::{MemoryRegistryStore, RegistryEntry, RegistryError, RegistryStore};
