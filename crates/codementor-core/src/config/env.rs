use super::{Config, VectorBackend};
use crate::secret::Secret;

fn secret_var(name: &str) -> Option<Secret> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(Secret::new)
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_core();
        self.apply_env_overrides_secrets();
    }

    fn apply_env_overrides_core(&mut self) {
        if let Ok(v) = std::env::var("CODEMENTOR_GENERATION_MODEL") {
            self.generation.model = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_GENERATION_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_ANALYSIS_MODEL") {
            self.analysis.model = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_COMPLIANCE_MODEL") {
            self.compliance.model = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_EMBEDDING_DIMENSION")
            && let Ok(dimension) = v.parse::<usize>()
        {
            self.embedding.dimension = dimension;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_VECTOR_BACKEND") {
            match v.to_lowercase().as_str() {
                "remote" => self.vector_store.backend = VectorBackend::Remote,
                "memory" => self.vector_store.backend = VectorBackend::Memory,
                _ => tracing::warn!("ignoring invalid CODEMENTOR_VECTOR_BACKEND value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("CODEMENTOR_RETRIEVAL_TOP_K")
            && let Ok(top_k) = v.parse::<usize>()
        {
            self.retrieval.top_k = top_k;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_RETRIEVAL_TOP_N")
            && let Ok(top_n) = v.parse::<usize>()
        {
            self.retrieval.top_n = top_n;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_RETRIEVAL_ALPHA")
            && let Ok(alpha) = v.parse::<f32>()
        {
            self.retrieval.alpha = alpha;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_EMBED_CONCURRENCY")
            && let Ok(concurrency) = v.parse::<usize>()
        {
            self.resync.embed_concurrency = concurrency;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_UPLOAD_DIR") {
            self.resync.upload_dir = v.into();
        }
        if let Ok(v) = std::env::var("CODEMENTOR_SQLITE_PATH") {
            self.folder_cache.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_GATEWAY_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.gateway.port = port;
        }
        if let Ok(v) = std::env::var("CODEMENTOR_GATEWAY_RATE_LIMIT")
            && let Ok(limit) = v.parse::<u32>()
        {
            self.gateway.rate_limit = limit;
        }
    }

    fn apply_env_overrides_secrets(&mut self) {
        if let Some(key) = secret_var("CODEMENTOR_ANTHROPIC_API_KEY") {
            self.secrets.anthropic_api_key = Some(key);
        }
        if let Some(key) = secret_var("CODEMENTOR_OPENAI_API_KEY") {
            self.secrets.openai_api_key = Some(key);
        }
        if let Some(key) = secret_var("CODEMENTOR_GROQ_API_KEY") {
            self.secrets.groq_api_key = Some(key);
        }
        if let Some(key) = secret_var("CODEMENTOR_VOYAGE_API_KEY") {
            self.secrets.voyage_api_key = Some(key);
        }
        if let Some(key) = secret_var("CODEMENTOR_VECTOR_API_KEY") {
            self.secrets.vector_api_key = Some(key);
        }
        if let Ok(v) = std::env::var("CODEMENTOR_GATEWAY_TOKEN")
            && !v.trim().is_empty()
        {
            self.gateway.auth_token = Some(v);
        }
    }
}
