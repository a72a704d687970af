//! Configuration for the storygraph pipeline.
//!
//! Loaded from `storygraph.toml` and `STORYGRAPH__` environment variables
//! (`STORYGRAPH__NEO4J__URI`, `STORYGRAPH__INGEST__MAX_WORKERS`, ...).

use std::time::Duration;

use serde::Deserialize;

use storygraph_graph::GraphConfig;
use storygraph_registry::{MatchPolicy, SimilarityMetric, TieBreak};

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub neo4j: GraphConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Settings {
    /// Load `{file_prefix}.toml` (optional) overlaid with environment.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("STORYGRAPH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// `[registry]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// SQLite file holding canonical names.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Minimum fuzzy similarity for a match.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub metric: SimilarityMetric,

    #[serde(default)]
    pub tie_break: TieBreak,
}

impl RegistryConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            threshold: self.threshold,
            metric: self.metric,
            tie_break: self.tie_break,
            ..MatchPolicy::default()
        }
    }
}

fn default_db_path() -> String {
    "entities.db".to_string()
}

fn default_threshold() -> f64 {
    storygraph_registry::matching::DEFAULT_THRESHOLD
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            threshold: default_threshold(),
            metric: SimilarityMetric::default(),
            tie_break: TieBreak::default(),
        }
    }
}

/// Which extraction backend the pipeline talks to.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON over HTTP to a text-generation service.
    #[default]
    Http,
    /// Pre-computed `<document>.kg.json` files next to each document.
    Sidecar,
}

/// `[ingest]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Documents processed in parallel.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Whole-document budget, extraction and merge included.
    #[serde(default = "default_document_timeout")]
    pub document_timeout_secs: u64,

    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,

    /// Per graph-store call.
    #[serde(default = "default_graph_timeout")]
    pub graph_timeout_secs: u64,

    /// Directory for run journal storage.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Extraction service URL for the HTTP backend.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl IngestConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn graph_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_timeout_secs)
    }
}

fn default_max_workers() -> usize {
    5
}

fn default_document_timeout() -> u64 {
    600
}

fn default_extraction_timeout() -> u64 {
    300
}

fn default_graph_timeout() -> u64 {
    30
}

fn default_journal_dir() -> String {
    "./journal".to_string()
}

fn default_endpoint() -> String {
    "http://localhost:8000/extract".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            document_timeout_secs: default_document_timeout(),
            extraction_timeout_secs: default_extraction_timeout(),
            graph_timeout_secs: default_graph_timeout(),
            journal_dir: default_journal_dir(),
            backend: BackendKind::default(),
            endpoint: default_endpoint(),
        }
    }
}
