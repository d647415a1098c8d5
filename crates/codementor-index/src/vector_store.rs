//! Vector store abstraction: control plane (describe/create index) and data
//! plane (upsert/query) behind one object-safe trait.

use serde_json::{Map, Value, json};

use codementor_llm::BoxFuture;

use crate::error::Result;
use crate::types::{Namespace, SparseVector, VectorRecord};

/// Parameters for creating an index. The name is `{metric}-{dimension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    #[must_use]
    pub fn new(
        metric: impl Into<String>,
        dimension: usize,
        cloud: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let metric = metric.into();
        Self {
            name: format!("{metric}-{dimension}"),
            dimension,
            metric,
            cloud: cloud.into(),
            region: region.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub host: String,
    pub ready: bool,
}

impl IndexDescription {
    #[must_use]
    pub fn handle(&self) -> IndexHandle {
        IndexHandle {
            name: self.name.clone(),
            host: self.host.clone(),
        }
    }
}

/// Data-plane connection target of a provisioned index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub host: String,
}

/// Metadata filter applied server side.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    /// `field` equals one of `values`.
    FieldIn { field: String, values: Vec<String> },
}

impl MetadataFilter {
    #[must_use]
    pub fn file_path_in(values: Vec<String>) -> Self {
        Self::FieldIn {
            field: "file_path".into(),
            values,
        }
    }

    /// Filter document in the `{"field": {"$in": [...]}}` form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::FieldIn { field, values } => {
                let mut filter = Map::new();
                filter.insert(field.clone(), json!({ "$in": values }));
                Value::Object(filter)
            }
        }
    }

    #[must_use]
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Self::FieldIn { field, values } => metadata
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub namespace: Namespace,
    pub top_k: usize,
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
    pub filter: Option<MetadataFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

impl QueryMatch {
    /// Stored chunk text, if the record carries one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.metadata
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }
}

pub trait VectorStore: Send + Sync {
    /// `None` when no index with `name` exists.
    fn describe_index<'a>(&'a self, name: &'a str)
    -> BoxFuture<'a, Result<Option<IndexDescription>>>;

    fn create_index<'a>(&'a self, spec: &'a IndexSpec) -> BoxFuture<'a, Result<IndexDescription>>;

    /// Insert or replace `records` by id. Returns the number upserted.
    fn upsert<'a>(
        &'a self,
        index: &'a IndexHandle,
        namespace: &'a Namespace,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'a, Result<usize>>;

    /// Nearest records in `request.namespace`, best first, metadata included.
    fn query<'a>(
        &'a self,
        index: &'a IndexHandle,
        request: QueryRequest,
    ) -> BoxFuture<'a, Result<Vec<QueryMatch>>>;

    fn name(&self) -> &str;
}
