//! Process-local vector store with dot-product scoring over dense and sparse
//! parts. Backs the `memory` backend and pipeline tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use codementor_llm::BoxFuture;

use crate::error::{IndexError, Result};
use crate::types::{Namespace, SparseVector, VectorRecord};
use crate::vector_store::{
    IndexDescription, IndexHandle, IndexSpec, QueryMatch, QueryRequest, VectorStore,
};

#[derive(Debug, Default)]
struct MemoryIndex {
    dimension: usize,
    /// Describe calls left before the index reports ready.
    pending_checks: u32,
    namespaces: HashMap<String, HashMap<String, VectorRecord>>,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    indexes: RwLock<HashMap<String, MemoryIndex>>,
    ready_after: u32,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Newly created indexes report not-ready for the first `checks` describes.
    #[must_use]
    pub fn with_ready_after(mut self, checks: u32) -> Self {
        self.ready_after = checks;
        self
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Stored records in `namespace` of index `name`.
    #[must_use]
    pub fn record_count(&self, name: &str, namespace: &Namespace) -> usize {
        self.indexes
            .read()
            .ok()
            .and_then(|indexes| {
                indexes
                    .get(name)
                    .and_then(|i| i.namespaces.get(namespace.as_str()).map(HashMap::len))
            })
            .unwrap_or(0)
    }

    /// Stored record by id, if present.
    #[must_use]
    pub fn record(&self, name: &str, namespace: &Namespace, id: &str) -> Option<VectorRecord> {
        self.indexes.read().ok().and_then(|indexes| {
            indexes
                .get(name)
                .and_then(|i| i.namespaces.get(namespace.as_str()))
                .and_then(|space| space.get(id).cloned())
        })
    }

    fn poisoned() -> IndexError {
        IndexError::Store("in-memory index lock poisoned".into())
    }

    fn describe_sync(&self, name: &str) -> Result<Option<IndexDescription>> {
        let mut indexes = self.indexes.write().map_err(|_| Self::poisoned())?;
        Ok(indexes.get_mut(name).map(|index| {
            let ready = index.pending_checks == 0;
            index.pending_checks = index.pending_checks.saturating_sub(1);
            IndexDescription {
                name: name.to_owned(),
                host: format!("memory://{name}"),
                ready,
            }
        }))
    }

    fn create_sync(&self, spec: &IndexSpec) -> Result<IndexDescription> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut indexes = self.indexes.write().map_err(|_| Self::poisoned())?;
        indexes.entry(spec.name.clone()).or_insert_with(|| MemoryIndex {
            dimension: spec.dimension,
            pending_checks: self.ready_after,
            namespaces: HashMap::new(),
        });
        Ok(IndexDescription {
            name: spec.name.clone(),
            host: format!("memory://{}", spec.name),
            ready: self.ready_after == 0,
        })
    }

    fn upsert_sync(
        &self,
        index: &IndexHandle,
        namespace: &Namespace,
        records: Vec<VectorRecord>,
    ) -> Result<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut indexes = self.indexes.write().map_err(|_| Self::poisoned())?;
        let target = indexes
            .get_mut(&index.name)
            .ok_or_else(|| IndexError::Store(format!("index {} does not exist", index.name)))?;
        if let Some(bad) = records
            .iter()
            .find(|r| r.dense_values.len() != target.dimension)
        {
            return Err(IndexError::InvalidArgument(format!(
                "vector {} has dimension {}, index expects {}",
                bad.id,
                bad.dense_values.len(),
                target.dimension
            )));
        }
        let count = records.len();
        let space = target
            .namespaces
            .entry(namespace.as_str().to_owned())
            .or_default();
        for record in records {
            space.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    fn query_sync(&self, index: &IndexHandle, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let indexes = self.indexes.read().map_err(|_| Self::poisoned())?;
        let Some(space) = indexes
            .get(&index.name)
            .and_then(|i| i.namespaces.get(request.namespace.as_str()))
        else {
            return Ok(Vec::new());
        };
        let empty = SparseVector::default();
        let sparse = request.sparse.as_ref().unwrap_or(&empty);
        let mut matches: Vec<QueryMatch> = space
            .values()
            .filter(|r| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|f| f.matches(&r.metadata))
            })
            .map(|r| {
                let dense: f32 = r
                    .dense_values
                    .iter()
                    .zip(&request.dense)
                    .map(|(a, b)| a * b)
                    .sum();
                QueryMatch {
                    id: r.id.clone(),
                    score: dense + r.sparse_values.dot(sparse),
                    metadata: r.metadata.clone(),
                }
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(request.top_k);
        Ok(matches)
    }
}

impl VectorStore for InMemoryVectorStore {
    fn describe_index<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<IndexDescription>>> {
        Box::pin(async move { self.describe_sync(name) })
    }

    fn create_index<'a>(&'a self, spec: &'a IndexSpec) -> BoxFuture<'a, Result<IndexDescription>> {
        Box::pin(async move { self.create_sync(spec) })
    }

    fn upsert<'a>(
        &'a self,
        index: &'a IndexHandle,
        namespace: &'a Namespace,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move { self.upsert_sync(index, namespace, records) })
    }

    fn query<'a>(
        &'a self,
        index: &'a IndexHandle,
        request: QueryRequest,
    ) -> BoxFuture<'a, Result<Vec<QueryMatch>>> {
        Box::pin(async move { self.query_sync(index, &request) })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "memory"
    }
}
