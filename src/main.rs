use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use codementor_core::config::{Config, resolve_config_path};
use codementor_gateway::GatewayServer;
use codementor_index::{Bm25Encoder, Chunk};
use tokio::sync::watch;

/// Code assistant backend: retrieval-augmented answers over indexed workspaces.
#[derive(Debug, Parser)]
#[command(name = "codementor", version, about)]
struct Cli {
    /// Path to the TOML config file (falls back to `CODEMENTOR_CONFIG`, then `config/default.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit BM25 parameters on chunk files and write them for `retrieval.sparse_params_path`.
    FitSparse {
        /// JSON chunk arrays, in the resync upload format.
        #[arg(required = true)]
        chunks: Vec<PathBuf>,
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn fit_sparse(chunk_files: &[PathBuf], output: &Path) -> anyhow::Result<usize> {
    let mut corpus = Vec::new();
    for path in chunk_files {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let chunks: Vec<Chunk> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a chunk array", path.display()))?;
        corpus.extend(chunks.into_iter().map(|c| c.text));
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Bm25Encoder::fit(&corpus)
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(corpus.len())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    if let Some(Command::FitSparse { chunks, output }) = &cli.command {
        let documents = fit_sparse(chunks, output)?;
        tracing::info!(documents, output = %output.display(), "sparse parameters written");
        return Ok(());
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;
    tracing::info!(
        path = %config_path.display(),
        generation_model = %config.generation.model,
        analysis_model = %config.analysis.model,
        backend = ?config.vector_store.backend,
        "configuration loaded"
    );

    let services = codementor_core::build_services(&config).await?;

    let gateway = &config.gateway;
    GatewayServer::new(&gateway.bind, gateway.port, services, shutdown_signal())
        .with_auth(gateway.auth_token.clone())
        .with_rate_limit(gateway.rate_limit)
        .with_max_body_size(gateway.max_body_size)
        .serve()
        .await
        .context("gateway stopped with an error")?;

    tracing::info!("shutdown complete");
    Ok(())
}
