//! Batched embedding and upsert of codebase chunks into a user namespace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};

use codementor_llm::{EmbeddingProvider, InputType, LlmError};

use crate::error::{IndexError, Result};
use crate::folder_cache::FolderStructureStore;
use crate::folder_structure::{default_excluded_dirs, render_folder_structure};
use crate::provision::IndexProvisioner;
use crate::sparse::Bm25Encoder;
use crate::types::{Chunk, Namespace, VectorRecord};
use crate::vector_store::{IndexHandle, VectorStore};

const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncConfig {
    pub process_batch_size: usize,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    /// Embedding calls allowed in flight at once, across all resyncs.
    pub embed_concurrency: usize,
    /// Serialize resyncs that target the same namespace.
    pub serialize_namespace: bool,
    pub excluded_dirs: Vec<String>,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            process_batch_size: 90,
            embed_batch_size: 90,
            upsert_batch_size: 90,
            embed_concurrency: 5,
            serialize_namespace: true,
            excluded_dirs: default_excluded_dirs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub upserted_count: usize,
    pub batches_processed: usize,
    pub message: String,
}

pub struct ResyncPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    provisioner: Arc<IndexProvisioner>,
    sparse: Arc<Bm25Encoder>,
    folders: Arc<dyn FolderStructureStore>,
    config: ResyncConfig,
    embed_permits: Arc<Semaphore>,
    namespace_locks: LockTable,
}

impl ResyncPipeline {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        provisioner: Arc<IndexProvisioner>,
        sparse: Arc<Bm25Encoder>,
        folders: Arc<dyn FolderStructureStore>,
        mut config: ResyncConfig,
    ) -> Self {
        config.process_batch_size = config.process_batch_size.max(1);
        config.embed_batch_size = config.embed_batch_size.max(1);
        config.upsert_batch_size = config.upsert_batch_size.max(1);
        config.embed_concurrency = config.embed_concurrency.max(1);
        Self {
            embedder,
            store,
            provisioner,
            sparse,
            folders,
            embed_permits: Arc::new(Semaphore::new(config.embed_concurrency)),
            config,
            namespace_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Embed and upsert `chunks` into the `{user}-{workspace}` namespace, then
    /// refresh the cached folder structure.
    ///
    /// Processing batches run one after another; embedding calls inside a
    /// batch share the pipeline-wide permit pool and upserts inside a batch
    /// run concurrently. The first failing sub-batch aborts the resync.
    ///
    /// # Errors
    ///
    /// Returns `Embedding` or `Upsert` naming the failed batch, a provisioning
    /// error, or a folder cache error.
    pub async fn resync(
        &self,
        chunks: &[Chunk],
        user_identity: &str,
        workspace_identity: &str,
    ) -> Result<UpsertSummary> {
        let namespace = Namespace::new(user_identity, workspace_identity)?;
        let _lease = if self.config.serialize_namespace {
            Some(self.lease_namespace(&namespace).await?)
        } else {
            None
        };

        let total_batches = chunks.len().div_ceil(self.config.process_batch_size);
        tracing::info!(%namespace, chunks = chunks.len(), batches = total_batches, "resync started");

        let mut summary = UpsertSummary {
            upserted_count: 0,
            batches_processed: 0,
            message: "Batch upserted successfully".into(),
        };

        if !chunks.is_empty() {
            let index = self.provisioner.ensure_index().await?;
            for (batch_no, batch) in chunks.chunks(self.config.process_batch_size).enumerate() {
                let upserted = self.process_batch(&index, &namespace, batch_no, batch).await?;
                summary.upserted_count += upserted;
                summary.batches_processed += 1;
                tracing::debug!(%namespace, batch = batch_no, upserted, "batch upserted");
            }
        }

        let structure = render_folder_structure(
            chunks.iter().map(|c| c.file_path.as_str()),
            &self.config.excluded_dirs,
        );
        self.folders
            .save(user_identity, workspace_identity, &structure)
            .await?;

        tracing::info!(
            %namespace,
            upserted = summary.upserted_count,
            batches = summary.batches_processed,
            "resync complete"
        );
        Ok(summary)
    }

    /// Read a JSON chunk array from `path` and resync it. The file is removed
    /// whether or not the resync succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` for an unreadable chunk file, otherwise the
    /// errors of [`ResyncPipeline::resync`].
    pub async fn resync_file(
        &self,
        path: &Path,
        user_identity: &str,
        workspace_identity: &str,
    ) -> Result<UpsertSummary> {
        let _cleanup = ChunkFileGuard(path.to_path_buf());
        let raw = tokio::fs::read_to_string(path).await?;
        let chunks: Vec<Chunk> = serde_json::from_str(&raw)?;
        self.resync(&chunks, user_identity, workspace_identity).await
    }

    async fn lease_namespace(&self, namespace: &Namespace) -> Result<NamespaceLease<'_>> {
        let lock = {
            let mut locks = self
                .namespace_locks
                .lock()
                .map_err(|_| IndexError::Store("namespace lock table poisoned".into()))?;
            Arc::clone(locks.entry(namespace.as_str().to_owned()).or_default())
        };
        Ok(NamespaceLease {
            guard: Some(lock.lock_owned().await),
            key: namespace.as_str().to_owned(),
            table: &self.namespace_locks,
        })
    }

    async fn process_batch(
        &self,
        index: &IndexHandle,
        namespace: &Namespace,
        batch_no: usize,
        batch: &[Chunk],
    ) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let dense = self.embed_batch(batch_no, &texts).await?;
        let sparse = self.sparse.encode_documents(&texts);

        let created_at = chrono::Utc::now().format(CREATED_AT_FORMAT).to_string();
        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(dense)
            .zip(sparse)
            .map(|((chunk, dense), sparse)| {
                VectorRecord::from_chunk(chunk, dense, sparse, &created_at)
            })
            .collect();

        let groups = split_owned(records, self.config.upsert_batch_size);
        let counts = try_join_all(
            groups
                .into_iter()
                .map(|group| self.store.upsert(index, namespace, group)),
        )
        .await
        .map_err(|source| IndexError::Upsert {
            batch: batch_no,
            source: Box::new(source),
        })?;
        Ok(counts.into_iter().sum())
    }

    /// Dense vectors for `texts`, in input order.
    async fn embed_batch(&self, batch_no: usize, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let calls = texts.chunks(self.config.embed_batch_size).map(|group| async move {
            let _permit = self
                .embed_permits
                .acquire()
                .await
                .map_err(|_| IndexError::Store("embedding permits closed".into()))?;
            let vectors = self
                .embedder
                .embed(group.to_vec(), InputType::Document)
                .await
                .map_err(|source| IndexError::Embedding {
                    batch: batch_no,
                    source,
                })?;
            if vectors.len() != group.len() {
                return Err(IndexError::Embedding {
                    batch: batch_no,
                    source: LlmError::malformed(
                        self.embedder.name(),
                        format!("expected {} embeddings, got {}", group.len(), vectors.len()),
                    ),
                });
            }
            Ok(vectors)
        });
        let groups = try_join_all(calls).await?;
        Ok(groups.into_iter().flatten().collect())
    }
}

fn split_owned<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut groups = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(size).collect());
    }
    groups
}

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Holds a namespace lock; the table entry is pruned when no other resync
/// holds or waits on it.
struct NamespaceLease<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: &'a LockTable,
}

impl Drop for NamespaceLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        // Clones are only taken under the table lock, so a count of one
        // means nobody else is queued on this namespace.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Removes the uploaded chunk file when dropped.
struct ChunkFileGuard(PathBuf);

impl Drop for ChunkFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!(path = %self.0.display(), "chunk file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.0.display(), "failed to remove chunk file: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use codementor_llm::mock::MockEmbedder;
    use proptest::prelude::*;

    use super::*;
    use crate::folder_cache::InMemoryFolderStore;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::vector_store::IndexSpec;

    const DIM: usize = 8;

    struct Fixture {
        embedder: MockEmbedder,
        store: Arc<InMemoryVectorStore>,
        folders: Arc<InMemoryFolderStore>,
        pipeline: ResyncPipeline,
    }

    fn fixture(embedder: MockEmbedder, config: ResyncConfig) -> Fixture {
        let store = Arc::new(InMemoryVectorStore::new());
        let folders = Arc::new(InMemoryFolderStore::new());
        let provisioner = Arc::new(IndexProvisioner::new(
            store.clone(),
            IndexSpec::new("dotproduct", DIM, "aws", "us-east-1"),
        ));
        let pipeline = ResyncPipeline::new(
            Arc::new(embedder.clone()),
            store.clone(),
            provisioner,
            Arc::new(Bm25Encoder::default()),
            folders.clone(),
            config,
        );
        Fixture {
            embedder,
            store,
            folders,
            pipeline,
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                id: format!("chunk-{i}"),
                file_path: format!("src/file_{}.py", i % 7),
                file_name: format!("file_{}.py", i % 7),
                start_line: 1,
                end_line: 10,
                text: format!("def function_{i}(): return {i}"),
                size: 30,
                extra: serde_json::Map::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn batches_counted_and_all_chunks_upserted() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        let summary = f.pipeline.resync(&chunks(200), "a@b.com", "ws1").await.unwrap();
        assert_eq!(summary.batches_processed, 3);
        assert_eq!(summary.upserted_count, 200);
        assert_eq!(summary.message, "Batch upserted successfully");
        let ns = Namespace::new("a@b.com", "ws1").unwrap();
        assert_eq!(f.store.record_count("dotproduct-8", &ns), 200);
        assert_eq!(f.embedder.call_count(), 3);
    }

    #[tokio::test]
    async fn embeddings_stay_aligned_with_chunks() {
        let config = ResyncConfig {
            process_batch_size: 40,
            embed_batch_size: 7,
            upsert_batch_size: 9,
            ..ResyncConfig::default()
        };
        let f = fixture(MockEmbedder::new(DIM).with_delay(2), config);
        let input = chunks(40);
        f.pipeline.resync(&input, "u", "w").await.unwrap();

        let ns = Namespace::new("u", "w").unwrap();
        for chunk in &input {
            let record = f.store.record("dotproduct-8", &ns, &chunk.id).unwrap();
            assert_eq!(record.dense_values, f.embedder.vector_for(&chunk.text));
            assert_eq!(record.metadata["text"], chunk.text.as_str());
            assert!(!record.sparse_values.is_empty());
            assert!(record.metadata.contains_key("created_at"));
        }
    }

    #[tokio::test]
    async fn embedding_fan_out_bounded_by_permits() {
        let config = ResyncConfig {
            process_batch_size: 100,
            embed_batch_size: 5,
            embed_concurrency: 3,
            ..ResyncConfig::default()
        };
        let f = fixture(MockEmbedder::new(DIM).with_delay(20), config);
        f.pipeline.resync(&chunks(100), "u", "w").await.unwrap();
        assert_eq!(f.embedder.call_count(), 20);
        assert!(f.embedder.peak_concurrency() <= 3);
        assert!(f.embedder.peak_concurrency() > 1);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_without_upsert_or_folder_refresh() {
        let f = fixture(MockEmbedder::new(DIM).failing(), ResyncConfig::default());
        let err = f.pipeline.resync(&chunks(10), "u", "w").await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding { batch: 0, .. }));
        assert_eq!(f.store.upsert_calls(), 0);
        assert!(f.folders.load("u", "w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dimension_mismatch_reported_as_upsert_failure() {
        let f = fixture(MockEmbedder::new(DIM + 1), ResyncConfig::default());
        let err = f.pipeline.resync(&chunks(3), "u", "w").await.unwrap_err();
        assert!(matches!(err, IndexError::Upsert { batch: 0, .. }));
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn folder_structure_saved_after_success() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        f.pipeline.resync(&chunks(14), "u", "w").await.unwrap();
        let tree = f.folders.load("u", "w").await.unwrap().unwrap();
        assert!(tree.starts_with("Found 7 unique file paths"));
        assert!(tree.contains("file_0.py"));
    }

    #[tokio::test]
    async fn empty_resync_skips_provisioning() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        let summary = f.pipeline.resync(&[], "u", "w").await.unwrap();
        assert_eq!(summary.batches_processed, 0);
        assert_eq!(summary.upserted_count, 0);
        assert_eq!(f.store.create_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_resyncs_of_one_namespace_both_complete() {
        let f = fixture(MockEmbedder::new(DIM).with_delay(5), ResyncConfig::default());
        let first = chunks(30);
        let (a, b) = tokio::join!(
            f.pipeline.resync(&first, "u", "w"),
            f.pipeline.resync(&first, "u", "w"),
        );
        assert_eq!(a.unwrap().upserted_count, 30);
        assert_eq!(b.unwrap().upserted_count, 30);
        let ns = Namespace::new("u", "w").unwrap();
        assert_eq!(f.store.record_count("dotproduct-8", &ns), 30);
        assert!(f.pipeline.namespace_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn namespace_locks_released_after_each_resync() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        for workspace in ["w1", "w2", "w3"] {
            f.pipeline.resync(&chunks(5), "u", workspace).await.unwrap();
        }
        assert!(f.pipeline.namespace_locks.lock().unwrap().is_empty());

        let failing = fixture(MockEmbedder::new(DIM).failing(), ResyncConfig::default());
        assert!(failing.pipeline.resync(&chunks(5), "u", "w").await.is_err());
        assert!(failing.pipeline.namespace_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunk_file_removed_after_success() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(
            &path,
            r#"[{"_id":"c1","file_path":"a.py","file_name":"a.py","start_line":1,"end_line":2,"code":"x = 1","size":5}]"#,
        )
        .unwrap();

        let summary = f.pipeline.resync_file(&path, "u", "w").await.unwrap();
        assert_eq!(summary.upserted_count, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn chunk_file_removed_after_parse_failure() {
        let f = fixture(MockEmbedder::new(DIM), ResyncConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(&path, "not json").unwrap();

        let err = f.pipeline.resync_file(&path, "u", "w").await.unwrap_err();
        assert!(matches!(err, IndexError::Json(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn chunk_file_removed_after_embedding_failure() {
        let f = fixture(MockEmbedder::new(DIM).failing(), ResyncConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(&path, r#"[{"id":"c1","file_path":"a.py","text":"x"}]"#).unwrap();

        assert!(f.pipeline.resync_file(&path, "u", "w").await.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn split_owned_keeps_order() {
        let groups = split_owned((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn batch_accounting(n in 0usize..250, batch in 1usize..60) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let config = ResyncConfig {
                process_batch_size: batch,
                embed_batch_size: batch,
                upsert_batch_size: batch,
                ..ResyncConfig::default()
            };
            let f = fixture(MockEmbedder::new(DIM), config);
            let summary = rt.block_on(f.pipeline.resync(&chunks(n), "u", "w")).unwrap();
            prop_assert_eq!(summary.batches_processed, n.div_ceil(batch));
            prop_assert_eq!(summary.upserted_count, n);
        }
    }
}
