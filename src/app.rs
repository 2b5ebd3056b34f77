//! Wiring: turn a [`Config`] into a ready [`Orchestrator`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use ragchat_core::chunk::ChunkingParams;
use ragchat_core::composer::ComposerSettings;
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::generation::GenerationProvider;
use ragchat_core::index::EmbedOptions;
use ragchat_core::memory::ConversationMemory;
use ragchat_core::orchestrator::{IndexMode, Orchestrator, OrchestratorSettings};
use ragchat_core::service::Timeouts;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::http::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Core settings derived from the config file.
///
/// Each service deadline covers a whole provider call including its
/// retries, so it is derived from the per-request timeout and retry count.
pub fn orchestrator_settings(config: &Config) -> Result<OrchestratorSettings> {
    let chunking = ChunkingParams::new(config.chunking.chunk_size, config.chunking.chunk_overlap)
        .context("invalid [chunking] settings")?;

    let timeouts = Timeouts {
        embedding: RetryPolicy::new(config.embedding.max_retries)
            .budget(Duration::from_secs(config.embedding.timeout_secs)),
        generation: RetryPolicy::new(config.generation.max_retries)
            .budget(Duration::from_secs(config.generation.timeout_secs)),
    };

    Ok(OrchestratorSettings {
        index_mode: config.retrieval.index_mode,
        chunking,
        embed: EmbedOptions {
            batch_size: config.embedding.batch_size,
            timeout: timeouts.embedding,
        },
        memory: ConversationMemory::new(config.memory.max_turns),
        composer: ComposerSettings {
            top_k: config.retrieval.top_k,
            timeouts,
            condense_question: config.retrieval.condense_question,
            evaluate: config.evaluation.enabled,
        },
        answer_sync_timeout: Duration::from_secs(config.retrieval.sync_timeout_secs),
    })
}

/// Open the database and build an orchestrator with the configured
/// providers.
pub async fn open(config: &Config) -> Result<Orchestrator> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    open_with_providers(config, embedder, generator).await
}

/// Like [`open`], with caller-supplied model services.
pub async fn open_with_providers(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
) -> Result<Orchestrator> {
    let settings = orchestrator_settings(config)?;
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    Ok(Orchestrator::new(store, embedder, generator, settings))
}

/// Restore the shared index from disk and index anything missing.
/// Does nothing in `rebuild` mode, where every request builds its own.
pub async fn warm_index(orchestrator: &Orchestrator) -> Result<()> {
    if orchestrator.index_mode() == IndexMode::Rebuild {
        return Ok(());
    }
    orchestrator.load_persisted().await?;
    let report = orchestrator.sync_index().await?;
    let snapshot = orchestrator.index().snapshot();
    info!(
        documents = snapshot.index.document_count(),
        chunks = snapshot.index.len(),
        failed = report.failed,
        "index ready"
    );
    Ok(())
}
