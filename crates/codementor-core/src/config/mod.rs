mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::analysis::RetrievalLimits;
use crate::orchestrator::OrchestratorSettings;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Config file path: `--config` argument, then `CODEMENTOR_CONFIG`, then the default location.
#[must_use]
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("CODEMENTOR_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the pipelines cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let retrieval = &self.retrieval;
        if !(0.0..=1.0).contains(&retrieval.alpha) {
            bail!("retrieval.alpha must be within [0, 1], got {}", retrieval.alpha);
        }
        if retrieval.top_k == 0 || retrieval.top_n == 0 {
            bail!("retrieval.top_k and retrieval.top_n must be positive");
        }
        if retrieval.top_n > retrieval.top_k {
            bail!(
                "retrieval.top_n ({}) must not exceed retrieval.top_k ({})",
                retrieval.top_n,
                retrieval.top_k
            );
        }
        if retrieval.top_k > retrieval.max_top_k {
            bail!(
                "retrieval.top_k ({}) must not exceed retrieval.max_top_k ({})",
                retrieval.top_k,
                retrieval.max_top_k
            );
        }
        let resync = &self.resync;
        if resync.process_batch_size == 0
            || resync.embed_batch_size == 0
            || resync.upsert_batch_size == 0
        {
            bail!("resync batch sizes must be positive");
        }
        if resync.embed_concurrency == 0 {
            bail!("resync.embed_concurrency must be positive");
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be positive");
        }
        if self.gateway.max_body_size == 0 {
            bail!("gateway.max_body_size must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            limits: RetrievalLimits {
                default_top_k: self.retrieval.top_k,
                default_top_n: self.retrieval.top_n,
                max_top_k: self.retrieval.max_top_k,
            },
            alpha: self.retrieval.alpha,
            stream_context_docs: self.retrieval.stream_context_docs,
            ..OrchestratorSettings::default()
        }
    }

    #[must_use]
    pub fn resync_config(&self) -> codementor_index::ResyncConfig {
        codementor_index::ResyncConfig {
            process_batch_size: self.resync.process_batch_size,
            embed_batch_size: self.resync.embed_batch_size,
            upsert_batch_size: self.resync.upsert_batch_size,
            embed_concurrency: self.resync.embed_concurrency,
            serialize_namespace: self.resync.serialize_namespace,
            excluded_dirs: self.resync.exclude_dirs.clone(),
        }
    }
}
