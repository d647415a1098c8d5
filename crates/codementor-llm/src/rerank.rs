//! Second-stage relevance reranking.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::{self, HttpTimeouts};
use crate::provider::BoxFuture;
use crate::usage::{SharedUsageSink, UsageRecord, tracing_sink};

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
const PROVIDER: &str = "voyage";

/// Position of a candidate in the submitted list and its relevance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

pub trait RerankProvider: Send + Sync {
    /// Order `documents` by relevance to `query`, keeping at most `top_n`.
    ///
    /// Every returned `index` is a valid position in `documents`.
    fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, LlmError>>;

    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct VoyageReranker {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    usage: SharedUsageSink,
}

impl fmt::Debug for VoyageReranker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageReranker")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl VoyageReranker {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: String, model: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: http::build_client(&HttpTimeouts::vector())?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model,
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

    async fn rerank_inner(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: usize,
    ) -> Result<Vec<RerankHit>, LlmError> {
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let body = RerankRequest {
            model: &self.model,
            query: &query,
            documents: &documents,
            top_k: top_n,
        };
        let request = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let resp: RerankResponse = http::send_json(PROVIDER, request).await?;

        if let Some(usage) = resp.usage {
            self.usage.record(UsageRecord::tokens(
                PROVIDER,
                "rerank",
                &self.model,
                usage.total_tokens,
            ));
        }

        let total = documents.len();
        let mut hits: Vec<RerankHit> = resp
            .data
            .into_iter()
            .filter(|d| d.index < total)
            .map(|d| RerankHit {
                index: d.index,
                relevance_score: d.relevance_score,
            })
            .collect();
        hits.truncate(top_n);
        Ok(hits)
    }
}

impl RerankProvider for VoyageReranker {
    fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, LlmError>> {
        Box::pin(self.rerank_inner(query, documents, top_n))
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankData>,
    #[serde(default)]
    usage: Option<RerankUsage>,
}

#[derive(Deserialize)]
struct RerankData {
    index: usize,
    relevance_score: f32,
}

#[derive(Deserialize)]
struct RerankUsage {
    #[serde(default)]
    total_tokens: u64,
}
