//! Parley application binary - composition root.
//!
//! Ties together all Parley crates into a single executable:
//! 1. Load configuration (TOML file, environment, CLI flags)
//! 2. `serve`: check startup requirements, load the embedding model and the
//!    vector collection, open the conversation log, build the pipelines and
//!    start the axum REST API server
//! 3. `index`: embed a JSON lines file into the vector store

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parley_api::{start_server, AppState};
use parley_chat::{AnswerPipeline, ChatModel, GeminiChatModel, RetrievalPipeline};
use parley_core::config::{ParleyConfig, API_KEY_ENV};
use parley_core::error::ParleyError;
use parley_storage::Database;
use parley_vector::{EmbeddingService, IndexingPipeline, OnnxEmbeddingService, SearchEngine, VectorStore};

use cli::{CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = if config_exists {
        ParleyConfig::load(&config_file)?
    } else {
        ParleyConfig::default()
    };
    config.apply_env();
    args.apply_overrides(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    if config_exists {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }

    let result = match args.command() {
        Command::Serve => serve(config).await,
        Command::Index { input, collection } => index(config, &input, collection).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Parley stopped with an error");
    }
    result
}

/// Validate, load every collaborator, then serve until shutdown.
async fn serve(config: ParleyConfig) -> AppResult<()> {
    config.validate()?;
    let api_key = config
        .api_key()
        .ok_or_else(|| ParleyError::Config(format!("Missing {}", API_KEY_ENV)))?;

    // Embedding model.
    let embedder = load_embedder(&config)?;

    // Vector collection.
    let store = VectorStore::open(&config.vector.persist_dir)?;
    let collection = match store.collection(&config.vector.collection)? {
        Some(collection) => collection,
        None => {
            let available: Vec<String> = store
                .list_collections()?
                .into_iter()
                .map(|c| c.name)
                .collect();
            return Err(ParleyError::VectorStore(format!(
                "Collection '{}' not found in {} (available: [{}])",
                config.vector.collection,
                config.vector.persist_dir.display(),
                available.join(", ")
            ))
            .into());
        }
    };
    if collection.dimensions != embedder.dimensions() {
        return Err(ParleyError::VectorStore(format!(
            "Collection '{}' was indexed with {}-dimensional embeddings but {} produces {}",
            collection.name,
            collection.dimensions,
            config.vector.embedding_model,
            embedder.dimensions()
        ))
        .into());
    }
    let index = store.load_collection(&collection.name)?;
    drop(store);
    if index.is_empty() {
        tracing::warn!(collection = %collection.name, "Collection is empty; answers will have no context");
    }

    // Conversation log.
    let db = Database::new(&config.storage.db_path)?;
    tracing::info!(path = %config.storage.db_path.display(), "Conversation database ready");

    // Chat model and pipelines.
    let model: Arc<dyn ChatModel> = Arc::new(GeminiChatModel::new(&config.llm, api_key)?);
    tracing::info!(model = %config.llm.model, "Chat model client ready");

    let search = SearchEngine::new(index, embedder);
    let retrieval = RetrievalPipeline::new(Arc::clone(&model), search, config.vector.top_k);
    let answer = AnswerPipeline::new(model);

    let state = AppState::new(db, retrieval, answer);
    start_server(&config, state).await?;
    Ok(())
}

/// Embed a JSON lines file into the configured (or given) collection.
async fn index(config: ParleyConfig, input: &Path, collection: Option<String>) -> AppResult<()> {
    let embedder = load_embedder(&config)?;
    let store = VectorStore::create(&config.vector.persist_dir)?;
    let collection = collection.unwrap_or_else(|| config.vector.collection.clone());

    let pipeline = IndexingPipeline::new(&store, collection.clone(), embedder)?;
    let summary = pipeline.ingest_file(input).await?;
    let total = store.count(&collection)?;

    tracing::info!(
        input = %input.display(),
        collection = %collection,
        stored = summary.stored,
        skipped = summary.skipped,
        total,
        "Indexing finished"
    );
    Ok(())
}

fn load_embedder(config: &ParleyConfig) -> Result<OnnxEmbeddingService, ParleyError> {
    let model_dir = config.vector.embedding_model_dir.as_path();
    let embedder = OnnxEmbeddingService::from_directory(model_dir)?;
    tracing::info!(
        model = %config.vector.embedding_model,
        dir = %model_dir.display(),
        dimensions = embedder.dimensions(),
        "Embedding model loaded"
    );
    Ok(embedder)
}
