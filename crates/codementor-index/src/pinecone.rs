//! REST adapter for a Pinecone-compatible serverless vector index.
//!
//! Control-plane calls go to the configured API base; data-plane calls go to
//! the per-index host returned when the index is described or created.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use codementor_llm::http::{self, HttpTimeouts};
use codementor_llm::usage::{SharedUsageSink, UsageRecord, UsageUnit, tracing_sink};
use codementor_llm::{BoxFuture, LlmError};

use crate::error::Result;
use crate::types::{Namespace, SparseVector, VectorRecord};
use crate::vector_store::{
    IndexDescription, IndexHandle, IndexSpec, QueryMatch, QueryRequest, VectorStore,
};

const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
const DEFAULT_API_VERSION: &str = "2025-01";
const PROVIDER: &str = "pinecone";

#[derive(Clone)]
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    control_url: String,
    api_version: String,
    usage: SharedUsageSink,
}

impl fmt::Debug for PineconeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PineconeStore")
            .field("api_key", &"<redacted>")
            .field("control_url", &self.control_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl PineconeStore {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: http::build_client(&HttpTimeouts::vector())?,
            api_key,
            control_url: DEFAULT_CONTROL_URL.into(),
            api_version: DEFAULT_API_VERSION.into(),
            usage: tracing_sink(),
        })
    }

    #[must_use]
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = http::trim_base_url(url.into());
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
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

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    async fn describe_inner(&self, name: &str) -> Result<Option<IndexDescription>> {
        let request = self
            .authorize(self.client.get(format!("{}/indexes/{name}", self.control_url)));
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::from_transport(PROVIDER, &e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::from_transport(PROVIDER, &e))?;
        if !status.is_success() {
            tracing::error!(provider = PROVIDER, %status, index = name, "describe index failed");
            return Err(LlmError::from_status(PROVIDER, status, &body).into());
        }
        let model: IndexModel =
            serde_json::from_str(&body).map_err(|e| LlmError::malformed(PROVIDER, e))?;
        Ok(Some(model.into()))
    }

    async fn create_inner(&self, spec: &IndexSpec) -> Result<IndexDescription> {
        let body = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: &spec.metric,
            spec: CreateSpec {
                serverless: Serverless {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        };
        let request = self
            .authorize(self.client.post(format!("{}/indexes", self.control_url)))
            .json(&body);
        let model: IndexModel = http::send_json(PROVIDER, request).await?;
        tracing::info!(index = %spec.name, dimension = spec.dimension, "index creation requested");
        Ok(model.into())
    }

    async fn upsert_inner(
        &self,
        index: &IndexHandle,
        namespace: &Namespace,
        records: Vec<VectorRecord>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let sent = records.len();
        let vectors: Vec<WireVector> = records.into_iter().map(WireVector::from).collect();
        let body = UpsertRequest {
            vectors,
            namespace: namespace.as_str(),
        };
        let request = self
            .authorize(
                self.client
                    .post(format!("{}/vectors/upsert", data_url(&index.host))),
            )
            .json(&body);
        let resp: UpsertResponse = http::send_json(PROVIDER, request).await?;
        if resp.upserted_count != sent {
            tracing::warn!(
                index = %index.name,
                %namespace,
                sent,
                upserted = resp.upserted_count,
                "upsert count differs from records sent"
            );
        }
        self.usage.record(UsageRecord {
            provider: PROVIDER.into(),
            operation: "upsert",
            model: index.name.clone(),
            units: resp.upserted_count as u64,
            unit: UsageUnit::WriteUnits,
        });
        Ok(resp.upserted_count)
    }

    async fn query_inner(
        &self,
        index: &IndexHandle,
        request: QueryRequest,
    ) -> Result<Vec<QueryMatch>> {
        let body = WireQuery {
            namespace: request.namespace.as_str(),
            top_k: request.top_k,
            vector: &request.dense,
            sparse_vector: request.sparse.as_ref().filter(|s| !s.is_empty()),
            filter: request.filter.as_ref().map(crate::vector_store::MetadataFilter::to_json),
            include_values: false,
            include_metadata: true,
        };
        let http_request = self
            .authorize(self.client.post(format!("{}/query", data_url(&index.host))))
            .json(&body);
        let resp: QueryResponse = http::send_json(PROVIDER, http_request).await?;
        if let Some(usage) = resp.usage {
            self.usage.record(UsageRecord {
                provider: PROVIDER.into(),
                operation: "query",
                model: index.name.clone(),
                units: usage.read_units,
                unit: UsageUnit::ReadUnits,
            });
        }
        Ok(resp
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }
}

impl VectorStore for PineconeStore {
    fn describe_index<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<IndexDescription>>> {
        Box::pin(self.describe_inner(name))
    }

    fn create_index<'a>(&'a self, spec: &'a IndexSpec) -> BoxFuture<'a, Result<IndexDescription>> {
        Box::pin(self.create_inner(spec))
    }

    fn upsert<'a>(
        &'a self,
        index: &'a IndexHandle,
        namespace: &'a Namespace,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(self.upsert_inner(index, namespace, records))
    }

    fn query<'a>(
        &'a self,
        index: &'a IndexHandle,
        request: QueryRequest,
    ) -> BoxFuture<'a, Result<Vec<QueryMatch>>> {
        Box::pin(self.query_inner(index, request))
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// Index hosts are returned without a scheme; test servers include one.
fn data_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        http::trim_base_url(host.to_owned())
    } else {
        format!("https://{host}")
    }
}

#[derive(Deserialize)]
struct IndexModel {
    name: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

impl From<IndexModel> for IndexDescription {
    fn from(model: IndexModel) -> Self {
        let ready = model
            .status
            .is_some_and(|s| s.ready || s.state.eq_ignore_ascii_case("ready"));
        Self {
            name: model.name,
            host: model.host,
            ready,
        }
    }
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: CreateSpec<'a>,
}

#[derive(Serialize)]
struct CreateSpec<'a> {
    serverless: Serverless<'a>,
}

#[derive(Serialize)]
struct Serverless<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireVector {
    id: String,
    values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_values: Option<SparseVector>,
    metadata: Map<String, Value>,
}

impl From<VectorRecord> for WireVector {
    fn from(record: VectorRecord) -> Self {
        let sparse = (!record.sparse_values.is_empty()).then_some(record.sparse_values);
        Self {
            id: record.id,
            values: record.dense_values,
            sparse_values: sparse,
            metadata: record.metadata,
        }
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector>,
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery<'a> {
    namespace: &'a str,
    top_k: usize,
    vector: &'a [f32],
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_vector: Option<&'a SparseVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
    #[serde(default)]
    usage: Option<QueryUsage>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryUsage {
    #[serde(default)]
    read_units: u64,
}
