//! Builds the long-lived services from a validated [`Config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use codementor_index::{
    Bm25Encoder, FolderStructureStore, HybridRetriever, InMemoryVectorStore, IndexProvisioner,
    IndexSpec, PineconeStore, ResyncPipeline, SqliteFolderStore, VectorStore,
};
use codementor_llm::claude::ClaudeProvider;
use codementor_llm::compatible::CompatibleProvider;
use codementor_llm::embed::VoyageEmbedder;
use codementor_llm::http::build_client;
use codementor_llm::openai::OpenAiProvider;
use codementor_llm::rerank::VoyageReranker;
use codementor_llm::usage::tracing_sink;
use codementor_llm::{AnyProvider, EmbeddingProvider, RerankProvider, SharedUsageSink};

use crate::config::{Config, VectorBackend};
use crate::indexing::IndexingService;
use crate::orchestrator::{ResponseOrchestrator, RoleProviders};
use crate::rewrite::CodeRewriter;
use crate::secret::Secret;

/// Everything the HTTP surface needs to serve requests.
pub struct Services {
    pub orchestrator: Arc<ResponseOrchestrator<AnyProvider>>,
    pub rewriter: Arc<CodeRewriter<AnyProvider>>,
    pub indexing: Arc<IndexingService>,
    pub upload_dir: PathBuf,
}

fn require_key(secret: Option<&Secret>, var: &str) -> anyhow::Result<String> {
    Ok(secret
        .with_context(|| format!("{var} is not set"))?
        .expose()
        .to_owned())
}

struct Clients {
    generation: reqwest::Client,
    vector: reqwest::Client,
}

impl Clients {
    fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            generation: build_client(&config.http.generation_timeouts())
                .context("failed to build generation HTTP client")?,
            vector: build_client(&config.http.vector_timeouts())
                .context("failed to build vector HTTP client")?,
        })
    }
}

fn role_providers(
    config: &Config,
    clients: &Clients,
    usage: &SharedUsageSink,
) -> anyhow::Result<RoleProviders<AnyProvider>> {
    let secrets = &config.secrets;

    let generation = ClaudeProvider::new(
        require_key(
            secrets.anthropic_api_key.as_ref(),
            "CODEMENTOR_ANTHROPIC_API_KEY",
        )?,
        config.generation.model.clone(),
        config.generation.max_tokens,
    )
    .context("failed to create generation provider")?
    .with_base_url(config.generation.base_url.clone())
    .with_stream_max_tokens(config.generation.stream_max_tokens)
    .with_client(clients.generation.clone())
    .with_usage_sink(Arc::clone(usage));

    let analysis = OpenAiProvider::new(
        require_key(secrets.openai_api_key.as_ref(), "CODEMENTOR_OPENAI_API_KEY")?,
        config.analysis.model.clone(),
    )
    .context("failed to create analysis provider")?
    .with_base_url(config.analysis.base_url.clone())
    .with_client(clients.generation.clone())
    .with_usage_sink(Arc::clone(usage));

    let compliance = CompatibleProvider::new(
        "groq".into(),
        require_key(secrets.groq_api_key.as_ref(), "CODEMENTOR_GROQ_API_KEY")?,
        config.compliance.base_url.clone(),
        config.compliance.model.clone(),
    )
    .context("failed to create compliance provider")?
    .with_client(clients.generation.clone())
    .with_usage_sink(Arc::clone(usage));

    Ok(RoleProviders {
        generation: Arc::new(generation.into()),
        analysis: Arc::new(analysis.into()),
        compliance: Arc::new(compliance.into()),
    })
}

fn vector_store(
    config: &Config,
    clients: &Clients,
    usage: &SharedUsageSink,
) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vector_store.backend {
        VectorBackend::Memory => {
            tracing::warn!("using in-memory vector store; indexed data is lost on restart");
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
        VectorBackend::Remote => {
            let key = require_key(
                config.secrets.vector_api_key.as_ref(),
                "CODEMENTOR_VECTOR_API_KEY",
            )?;
            let store = PineconeStore::new(key)
                .context("failed to create vector store client")?
                .with_control_url(config.vector_store.control_url.clone())
                .with_api_version(config.vector_store.api_version.clone())
                .with_client(clients.vector.clone())
                .with_usage_sink(Arc::clone(usage));
            Ok(Arc::new(store))
        }
    }
}

fn sparse_encoder(path: Option<&Path>) -> anyhow::Result<Bm25Encoder> {
    match path {
        Some(path) => Bm25Encoder::load(path)
            .with_context(|| format!("failed to load sparse params from {}", path.display())),
        None => Ok(Bm25Encoder::default()),
    }
}

async fn folder_store(sqlite_path: &str) -> anyhow::Result<Arc<dyn FolderStructureStore>> {
    if sqlite_path != ":memory:"
        && let Some(parent) = Path::new(sqlite_path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteFolderStore::open(sqlite_path)
        .await
        .with_context(|| format!("failed to open folder cache at {sqlite_path}"))?;
    Ok(Arc::new(store))
}

/// Construct providers, stores and pipelines once at startup.
///
/// # Errors
///
/// Returns an error when a required API key is missing, an HTTP client cannot
/// be built, the sparse params file is unreadable, or the folder cache cannot
/// be opened.
pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let clients = Clients::new(config)?;
    let usage = tracing_sink();

    let providers = role_providers(config, &clients, &usage)?;
    let voyage_key = require_key(
        config.secrets.voyage_api_key.as_ref(),
        "CODEMENTOR_VOYAGE_API_KEY",
    )?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        VoyageEmbedder::new(
            voyage_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimension,
        )
        .context("failed to create embedding provider")?
        .with_base_url(config.embedding.base_url.clone())
        .with_client(clients.generation.clone())
        .with_usage_sink(Arc::clone(&usage)),
    );
    let reranker: Arc<dyn RerankProvider> = Arc::new(
        VoyageReranker::new(voyage_key, config.rerank.model.clone())
            .context("failed to create rerank provider")?
            .with_base_url(config.rerank.base_url.clone())
            .with_client(clients.vector.clone())
            .with_usage_sink(Arc::clone(&usage)),
    );

    let store = vector_store(config, &clients, &usage)?;
    let spec = IndexSpec::new(
        config.vector_store.metric.clone(),
        config.embedding.dimension,
        config.vector_store.cloud.clone(),
        config.vector_store.region.clone(),
    );
    tracing::info!(index = %spec.name, backend = ?config.vector_store.backend, "vector index configured");
    let provisioner = Arc::new(IndexProvisioner::new(Arc::clone(&store), spec));
    let sparse = Arc::new(sparse_encoder(
        config.vector_store.sparse_params_path.as_deref(),
    )?);
    let folders = folder_store(&config.folder_cache.sqlite_path).await?;

    let resync = Arc::new(ResyncPipeline::new(
        Arc::clone(&embedder),
        Arc::clone(&store),
        Arc::clone(&provisioner),
        Arc::clone(&sparse),
        Arc::clone(&folders),
        config.resync_config(),
    ));
    let retriever = Arc::new(
        HybridRetriever::new(embedder, reranker, store, provisioner, sparse)
            .with_expansion_max_results(config.retrieval.expansion_max_results),
    );

    let rewriter = Arc::new(CodeRewriter::new(Arc::clone(&providers.generation)));
    let orchestrator = Arc::new(ResponseOrchestrator::new(
        providers,
        retriever,
        folders,
        config.orchestrator_settings(),
    ));

    Ok(Services {
        orchestrator,
        rewriter,
        indexing: Arc::new(IndexingService::new(resync)),
        upload_dir: config.resync.upload_dir.clone(),
    })
}

#[cfg(test)]
mod tests {
    use crate::config::ResolvedSecrets;

    use super::*;

    fn keyed_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.vector_store.backend = VectorBackend::Memory;
        config.folder_cache.sqlite_path = dir
            .join("nested")
            .join("folders.db")
            .to_string_lossy()
            .into_owned();
        config.resync.upload_dir = dir.join("uploads");
        config.secrets = ResolvedSecrets {
            anthropic_api_key: Some(Secret::new("sk-ant")),
            openai_api_key: Some(Secret::new("sk-openai")),
            groq_api_key: Some(Secret::new("gsk")),
            voyage_api_key: Some(Secret::new("pa")),
            vector_api_key: None,
        };
        config
    }

    #[tokio::test]
    async fn builds_with_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = keyed_config(dir.path());

        let services = build_services(&config).await.unwrap();
        assert_eq!(services.upload_dir, dir.path().join("uploads"));
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn missing_generation_key_names_the_variable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = keyed_config(dir.path());
        config.secrets.anthropic_api_key = None;

        let err = build_services(&config).await.err().unwrap();
        assert!(err.to_string().contains("CODEMENTOR_ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn remote_backend_requires_vector_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = keyed_config(dir.path());
        config.vector_store.backend = VectorBackend::Remote;

        let err = build_services(&config).await.err().unwrap();
        assert!(err.to_string().contains("CODEMENTOR_VECTOR_API_KEY"));
    }

    #[test]
    fn unreadable_sparse_params_fail() {
        let err = sparse_encoder(Some(Path::new("/nonexistent/bm25.json"))).unwrap_err();
        assert!(err.to_string().contains("sparse params"));
    }
}
