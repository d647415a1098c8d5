//! Hybrid dense+sparse retrieval with rerank and same-file expansion.

use std::collections::HashSet;
use std::sync::Arc;

use codementor_llm::{EmbeddingProvider, InputType, LlmError, RerankProvider};

use crate::error::{IndexError, Result};
use crate::hybrid::hybrid_scale;
use crate::provision::IndexProvisioner;
use crate::sparse::Bm25Encoder;
use crate::types::{DocumentMetadata, Namespace, RetrievedDocument};
use crate::vector_store::{MetadataFilter, QueryMatch, QueryRequest, VectorStore};

/// Relevance assigned to documents recovered by file expansion.
pub const EXPANSION_RELEVANCE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub top_n: usize,
    pub alpha: f32,
}

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn RerankProvider>,
    store: Arc<dyn VectorStore>,
    provisioner: Arc<IndexProvisioner>,
    sparse: Arc<Bm25Encoder>,
    expansion_max_results: usize,
}

impl HybridRetriever {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn RerankProvider>,
        store: Arc<dyn VectorStore>,
        provisioner: Arc<IndexProvisioner>,
        sparse: Arc<Bm25Encoder>,
    ) -> Self {
        Self {
            embedder,
            reranker,
            store,
            provisioner,
            sparse,
            expansion_max_results: 200,
        }
    }

    #[must_use]
    pub fn with_expansion_max_results(mut self, max: usize) -> Self {
        self.expansion_max_results = max;
        self
    }

    /// Reranked top matches for `query_text`, followed by every chunk of the
    /// files those matches came from.
    ///
    /// The two groups are not deduplicated: a chunk can appear both as a
    /// reranked hit and as part of its file's expansion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range `alpha`, or the failure
    /// of any embedding, vector store or rerank call.
    pub async fn retrieve(
        &self,
        query_text: &str,
        namespace: &Namespace,
        params: RetrievalParams,
    ) -> Result<Vec<RetrievedDocument>> {
        let Some(index) = self.provisioner.existing_index().await? else {
            tracing::warn!(%namespace, "index does not exist yet, nothing to retrieve");
            return Ok(Vec::new());
        };

        let dense = self
            .embedder
            .embed(vec![query_text.to_owned()], InputType::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::malformed(self.embedder.name(), "no query embedding"))?;
        let sparse = self.sparse.encode_query(query_text);
        let (dense, sparse) = hybrid_scale(&dense, &sparse, params.alpha)?;

        let matches: Vec<QueryMatch> = self
            .store
            .query(
                &index,
                QueryRequest {
                    namespace: namespace.clone(),
                    top_k: params.top_k,
                    dense,
                    sparse: Some(sparse),
                    filter: None,
                },
            )
            .await?
            .into_iter()
            .filter(|m| m.text().is_some())
            .collect();

        if matches.is_empty() {
            tracing::debug!(%namespace, "no matches, skipping rerank and expansion");
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let touched: Vec<String> = matches
            .iter()
            .filter_map(|m| m.metadata.get("file_path").and_then(|v| v.as_str()))
            .filter(|p| seen.insert(*p))
            .map(str::to_owned)
            .collect();

        let expand = async {
            if touched.is_empty() {
                return Ok(Vec::new());
            }
            let request = QueryRequest {
                namespace: namespace.clone(),
                top_k: self.expansion_max_results,
                dense: vec![0.0; self.embedder.dimension()],
                sparse: None,
                filter: Some(MetadataFilter::file_path_in(touched)),
            };
            self.store.query(&index, request).await
        };
        let texts: Vec<String> = matches
            .iter()
            .filter_map(|m| m.text().map(str::to_owned))
            .collect();

        let (expansion, hits) = tokio::try_join!(
            expand,
            async {
                self.reranker
                    .rerank(query_text.to_owned(), texts, params.top_n)
                    .await
                    .map_err(IndexError::from)
            },
        )?;

        let mut documents: Vec<RetrievedDocument> = hits
            .into_iter()
            .filter_map(|hit| matches.get(hit.index).map(|m| (hit, m)))
            .map(|(hit, m)| to_document(m, hit.relevance_score))
            .collect();
        let reranked = documents.len();
        documents.extend(
            expansion
                .iter()
                .filter(|m| m.text().is_some())
                .map(|m| to_document(m, EXPANSION_RELEVANCE)),
        );

        tracing::info!(
            %namespace,
            matches = matches.len(),
            reranked,
            expanded = documents.len() - reranked,
            "retrieval complete"
        );
        Ok(documents)
    }
}

fn to_document(m: &QueryMatch, relevance_score: f32) -> RetrievedDocument {
    RetrievedDocument {
        text: m.text().unwrap_or_default().to_owned(),
        relevance_score,
        metadata: DocumentMetadata::from_stored(m.score, &m.metadata),
    }
}
