//! Dense embedding providers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::{self, HttpTimeouts};
use crate::provider::BoxFuture;
use crate::usage::{SharedUsageSink, UsageRecord, tracing_sink};

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
const PROVIDER: &str = "voyage";

/// Whether texts are stored documents or search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one vector per input in input order.
    fn embed(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LlmError>>;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Voyage-style `/embeddings` adapter.
#[derive(Clone)]
pub struct VoyageEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    usage: SharedUsageSink,
}

impl fmt::Debug for VoyageEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageEmbedder")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl VoyageEmbedder {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: String, model: String, dimension: usize) -> Result<Self, LlmError> {
        Ok(Self {
            client: http::build_client(&HttpTimeouts::generation())?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model,
            dimension,
            usage: tracing_sink(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = http::trim_base_url(base_url.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_usage_sink(mut self, usage: SharedUsageSink) -> Self {
        self.usage = usage;
        self
    }

    async fn embed_inner(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let body = EmbeddingRequest {
            input: &texts,
            model: &self.model,
            input_type,
            output_dimension: self.dimension,
        };
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let resp: EmbeddingResponse = http::send_json(PROVIDER, request).await?;

        if let Some(usage) = resp.usage {
            self.usage.record(UsageRecord::tokens(
                PROVIDER,
                "embed",
                &self.model,
                usage.total_tokens,
            ));
        }

        let mut data = resp.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        if data.len() != expected {
            return Err(LlmError::malformed(
                PROVIDER,
                format!("expected {expected} embeddings, got {}", data.len()),
            ));
        }
        if let Some(bad) = data.iter().find(|d| d.embedding.len() != self.dimension) {
            return Err(LlmError::malformed(
                PROVIDER,
                format!(
                    "embedding dimension {} does not match {}",
                    bad.embedding.len(),
                    self.dimension
                ),
            ));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingProvider for VoyageEmbedder {
    fn embed(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LlmError>> {
        Box::pin(self.embed_inner(texts, input_type))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: InputType,
    output_dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    #[serde(default)]
    total_tokens: u64,
}
