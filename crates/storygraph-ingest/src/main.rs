//! CLI entry point for the storygraph pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use storygraph_core::KgFragment;
use storygraph_graph::{cypher, GraphClient, GraphStore, MergeEngine};
use storygraph_journal::{FileJournalStore, JournalStore, RunId};
use storygraph_registry::{NameRegistry, RegistryStore, SqliteRegistryStore};

use storygraph_ingest::config::{BackendKind, Settings};
use storygraph_ingest::document::read_list;
use storygraph_ingest::replay::replay_run;
use storygraph_ingest::{
    BatchRunner, CapitalizedSpanDetector, DocumentProcessor, ExtractionBackend,
    HttpExtractionBackend, SidecarBackend,
};

#[derive(Parser)]
#[command(name = "storygraph")]
#[command(about = "Build a knowledge graph from a document archive")]
struct Cli {
    /// Config file prefix (default: storygraph).
    #[arg(short, long, default_value = "storygraph", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, resolve and merge documents.
    Ingest {
        /// Document files.
        paths: Vec<PathBuf>,

        /// File listing one document path per line.
        #[arg(long)]
        list: Option<PathBuf>,
    },
    /// Print the Cypher a fragment would be merged with, without touching
    /// any store.
    Plan {
        /// Fragment JSON as produced by an extraction backend.
        fragment: PathBuf,

        /// Document id recorded in edge provenance.
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Re-merge a journaled run without calling the extraction backend.
    Replay {
        run_id: RunId,
    },
    /// Create the graph uniqueness constraint.
    InitSchema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config).context("loading configuration")?;

    match cli.command {
        Command::Ingest { mut paths, list } => {
            if let Some(list) = list {
                paths.extend(read_list(&list).await?);
            }
            if paths.is_empty() {
                anyhow::bail!("No documents given: pass paths or --list FILE");
            }
            ingest(&settings, paths).await
        }
        Command::Plan {
            fragment,
            source_id,
        } => {
            let raw = tokio::fs::read_to_string(&fragment)
                .await
                .with_context(|| format!("reading {}", fragment.display()))?;
            let fragment = KgFragment::from_json(&raw)?;
            for statement in cypher::render_script(&fragment, source_id.as_deref()) {
                println!("{statement}");
            }
            Ok(())
        }
        Command::Replay { run_id } => {
            let journal = FileJournalStore::new(&settings.ingest.journal_dir)?;
            let registry = Arc::new(open_registry(&settings)?);
            let engine = connect_engine(&settings).await?;
            let report = replay_run(&journal, &registry, &engine, run_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::InitSchema => {
            let graph = GraphClient::connect(&settings.neo4j).await?;
            graph.ensure_schema().await?;
            Ok(())
        }
    }
}

async fn ingest(settings: &Settings, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let registry = Arc::new(open_registry(settings)?);
    let engine = Arc::new(connect_engine(settings).await?);
    engine.store().ensure_schema().await?;

    let backend: Arc<dyn ExtractionBackend> = match settings.ingest.backend {
        BackendKind::Http => Arc::new(HttpExtractionBackend::new(
            &settings.ingest.endpoint,
            settings.ingest.extraction_timeout(),
        )?),
        BackendKind::Sidecar => Arc::new(SidecarBackend::default()),
    };

    let processor = DocumentProcessor::new(
        registry,
        Arc::new(CapitalizedSpanDetector::default()),
        backend,
        engine,
    )
    .with_extraction_timeout(settings.ingest.extraction_timeout());

    let journal: Arc<dyn JournalStore> =
        Arc::new(FileJournalStore::new(&settings.ingest.journal_dir)?);

    let report = BatchRunner::new(Arc::new(processor), settings.ingest.max_workers)
        .with_journal(journal)
        .with_document_timeout(settings.ingest.document_timeout())
        .run_paths(paths)
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failed.is_empty() {
        tracing::warn!(
            failed = report.failed.len(),
            "Some documents failed; replay them with `storygraph replay <run-id>`"
        );
    }
    Ok(())
}

fn open_registry(settings: &Settings) -> anyhow::Result<NameRegistry> {
    let store: Arc<dyn RegistryStore> = Arc::new(
        SqliteRegistryStore::open(&settings.registry.db_path)
            .with_context(|| format!("opening registry {}", settings.registry.db_path))?,
    );
    let registry = NameRegistry::open(store, settings.registry.policy())?;
    tracing::info!(entries = registry.len(), "Registry loaded");
    Ok(registry)
}

async fn connect_engine(settings: &Settings) -> anyhow::Result<MergeEngine> {
    let graph = GraphClient::connect(&settings.neo4j).await?;
    Ok(MergeEngine::new(Arc::new(graph) as Arc<dyn GraphStore>)
        .with_timeout(settings.ingest.graph_timeout()))
}
