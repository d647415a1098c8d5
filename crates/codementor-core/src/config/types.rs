use std::path::PathBuf;

use codementor_index::folder_structure::default_excluded_dirs;
use codementor_llm::http::HttpTimeouts;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub resync: ResyncSettings,
    #[serde(default)]
    pub folder_cache: FolderCacheConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_idle_secs")]
    pub pool_idle_secs: u64,
    /// Read and total timeout for generation and embedding calls.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Read and total timeout for vector store and rerank calls.
    #[serde(default = "default_vector_timeout_secs")]
    pub vector_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_pool_idle_secs() -> u64 {
    60
}

fn default_generation_timeout_secs() -> u64 {
    300
}

fn default_vector_timeout_secs() -> u64 {
    120
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_idle_secs: default_pool_idle_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            vector_timeout_secs: default_vector_timeout_secs(),
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn generation_timeouts(&self) -> HttpTimeouts {
        self.timeouts(self.generation_timeout_secs)
    }

    #[must_use]
    pub fn vector_timeouts(&self) -> HttpTimeouts {
        self.timeouts(self.vector_timeout_secs)
    }

    fn timeouts(&self, total: u64) -> HttpTimeouts {
        HttpTimeouts {
            connect_secs: self.connect_timeout_secs,
            read_secs: total,
            request_secs: total,
            pool_idle_secs: self.pool_idle_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_stream_max_tokens")]
    pub stream_max_tokens: u32,
}

fn default_generation_base_url() -> String {
    "https://api.anthropic.com/v1".into()
}

fn default_generation_model() -> String {
    "claude-3-7-sonnet-20250219".into()
}

fn default_max_tokens() -> u32 {
    64_000
}

fn default_stream_max_tokens() -> u32 {
    1024
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            stream_max_tokens: default_stream_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_base_url")]
    pub base_url: String,
    #[serde(default = "default_analysis_model")]
    pub model: String,
}

fn default_analysis_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_analysis_model() -> String {
    "gpt-4-turbo".into()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: default_analysis_base_url(),
            model: default_analysis_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_compliance_base_url")]
    pub base_url: String,
    #[serde(default = "default_compliance_model")]
    pub model: String,
}

fn default_compliance_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}

fn default_compliance_model() -> String {
    "gemma2-9b-it".into()
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            base_url: default_compliance_base_url(),
            model: default_compliance_model(),
        }
    }
}

fn default_voyage_base_url() -> String {
    "https://api.voyageai.com/v1".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_voyage_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

fn default_embedding_model() -> String {
    "voyage-code-3".into()
}

fn default_embedding_dimension() -> usize {
    1024
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_voyage_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    #[serde(default = "default_voyage_base_url")]
    pub base_url: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
}

fn default_rerank_model() -> String {
    "rerank-2".into()
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            base_url: default_voyage_base_url(),
            model: default_rerank_model(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Remote,
    /// Process-local store; contents are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorBackend,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Fitted BM25 parameters; the encoder uses built-in defaults when unset.
    #[serde(default)]
    pub sparse_params_path: Option<PathBuf>,
}

fn default_control_url() -> String {
    "https://api.pinecone.io".into()
}

fn default_api_version() -> String {
    "2025-01".into()
}

fn default_metric() -> String {
    "dotproduct".into()
}

fn default_cloud() -> String {
    "aws".into()
}

fn default_region() -> String {
    "us-east-1".into()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            control_url: default_control_url(),
            api_version: default_api_version(),
            metric: default_metric(),
            cloud: default_cloud(),
            region: default_region(),
            sparse_params_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_expansion_max_results")]
    pub expansion_max_results: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_stream_context_docs")]
    pub stream_context_docs: usize,
}

fn default_top_k() -> usize {
    20
}

fn default_top_n() -> usize {
    10
}

fn default_alpha() -> f32 {
    0.75
}

fn default_expansion_max_results() -> usize {
    200
}

fn default_max_top_k() -> usize {
    100
}

fn default_stream_context_docs() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_n: default_top_n(),
            alpha: default_alpha(),
            expansion_max_results: default_expansion_max_results(),
            max_top_k: default_max_top_k(),
            stream_context_docs: default_stream_context_docs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResyncSettings {
    #[serde(default = "default_batch_size")]
    pub process_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_true")]
    pub serialize_namespace: bool,
    /// Where uploaded chunk files are staged until their resync finishes.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_excluded_dirs")]
    pub exclude_dirs: Vec<String>,
}

fn default_batch_size() -> usize {
    90
}

fn default_embed_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

impl Default for ResyncSettings {
    fn default() -> Self {
        Self {
            process_batch_size: default_batch_size(),
            embed_batch_size: default_batch_size(),
            upsert_batch_size: default_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            serialize_namespace: true,
            upload_dir: default_upload_dir(),
            exclude_dirs: default_excluded_dirs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FolderCacheConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_sqlite_path() -> String {
    "data/codementor.db".into()
}

impl Default for FolderCacheConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Requests per minute per client address.
    #[serde(default = "default_gateway_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_gateway_max_body")]
    pub max_body_size: usize,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("rate_limit", &self.rate_limit)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_rate_limit() -> u32 {
    120
}

fn default_gateway_max_body() -> usize {
    50 * 1_048_576
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: None,
            rate_limit: default_gateway_rate_limit(),
            max_body_size: default_gateway_max_body(),
        }
    }
}

/// API keys read from the environment. Never serialized.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub anthropic_api_key: Option<Secret>,
    pub openai_api_key: Option<Secret>,
    pub groq_api_key: Option<Secret>,
    pub voyage_api_key: Option<Secret>,
    pub vector_api_key: Option<Secret>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            generation: GenerationConfig::default(),
            analysis: AnalysisConfig::default(),
            compliance: ComplianceConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            vector_store: VectorStoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            resync: ResyncSettings::default(),
            folder_cache: FolderCacheConfig::default(),
            gateway: GatewayConfig::default(),
            secrets: ResolvedSecrets::default(),
        }
    }
}
