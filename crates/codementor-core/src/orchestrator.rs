//! Per-request flow: compliance, analysis, optional retrieval, generation.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use codementor_index::{
    FolderStructureStore, HybridRetriever, IndexError, Namespace, RetrievalParams,
    RetrievedDocument,
};
use codementor_llm::{LlmError, LlmProvider};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::analysis::{QueryAnalysisResult, QueryAnalyzer, RetrievalLimits};
use crate::compliance::ComplianceGate;
use crate::error::{CoreError, Result};
use crate::pipeline::PipelineError;
use crate::prompts::{self, PromptInputs};
use crate::request::{QueryAnswer, QueryRequest, QueryResponse};
use crate::stream::StreamEvent;

/// One provider per role. They may share a type but usually point at different models.
pub struct RoleProviders<P> {
    pub generation: Arc<P>,
    pub analysis: Arc<P>,
    pub compliance: Arc<P>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    pub limits: RetrievalLimits,
    /// Dense weight of the hybrid query.
    pub alpha: f32,
    /// Documents placed in a streaming prompt.
    pub stream_context_docs: usize,
    /// Events buffered between the producer task and the transport.
    pub stream_buffer: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            limits: RetrievalLimits::default(),
            alpha: 0.75,
            stream_context_docs: 10,
            stream_buffer: 64,
        }
    }
}

enum StreamStop {
    /// The receiver is gone; nothing more may be sent.
    Disconnected,
    Failed(CoreError),
}

impl From<CoreError> for StreamStop {
    fn from(e: CoreError) -> Self {
        Self::Failed(e)
    }
}

impl From<LlmError> for StreamStop {
    fn from(e: LlmError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<IndexError> for StreamStop {
    fn from(e: IndexError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<PipelineError> for StreamStop {
    fn from(e: PipelineError) -> Self {
        Self::Failed(e.into())
    }
}

/// Drive `fut` unless the stream consumer goes away first.
async fn unless_closed<F: Future>(
    tx: &mpsc::Sender<StreamEvent>,
    fut: F,
) -> std::result::Result<F::Output, StreamStop> {
    tokio::select! {
        biased;
        () = tx.closed() => Err(StreamStop::Disconnected),
        out = fut => Ok(out),
    }
}

async fn send(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> std::result::Result<(), StreamStop> {
    tx.send(event).await.map_err(|_| StreamStop::Disconnected)
}

pub struct ResponseOrchestrator<P> {
    compliance: ComplianceGate<P>,
    analyzer: QueryAnalyzer<P>,
    generator: Arc<P>,
    retriever: Arc<HybridRetriever>,
    folders: Arc<dyn FolderStructureStore>,
    settings: OrchestratorSettings,
}

impl<P: LlmProvider + 'static> ResponseOrchestrator<P> {
    #[must_use]
    pub fn new(
        providers: RoleProviders<P>,
        retriever: Arc<HybridRetriever>,
        folders: Arc<dyn FolderStructureStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            compliance: ComplianceGate::new(providers.compliance),
            analyzer: QueryAnalyzer::new(providers.analysis, settings.limits),
            generator: providers.generation,
            retriever,
            folders,
            settings,
        }
    }

    /// Answer `request` in one piece.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed request, otherwise the first
    /// provider, pipeline or index failure.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        request.validate()?;
        let started = Instant::now();

        let verdict = self.compliance.check(&request.user_query).await?;
        if !verdict.accepted {
            tracing::info!(workspace = %request.workspace_name, "query rejected by compliance gate");
            return Ok(QueryResponse::Rejected {
                response: verdict.message,
            });
        }

        let analysis = self.analyzer.analyze(&request.user_query).await?;
        let folder_structure = self.folder_structure(request).await;
        let inputs = prompt_inputs(&analysis, &folder_structure);

        let prompt = if analysis.use_rag {
            let docs = self.retrieve(request, &analysis).await?;
            prompts::rag_prompt(&inputs, &docs, analysis.top_n)
        } else {
            prompts::direct_prompt(&inputs)
        };

        let response = self
            .generator
            .chat(&prompt.messages(&analysis.reformulated_query.reformulated_query))
            .await?;

        let processing_time = started.elapsed().as_secs_f64();
        tracing::info!(
            workspace = %request.workspace_name,
            used_rag = analysis.use_rag,
            processing_time,
            "query answered"
        );
        Ok(QueryResponse::Answered(QueryAnswer {
            response,
            used_rag: analysis.use_rag,
            analysis,
            processing_time,
            model: self.generator.model().to_owned(),
        }))
    }

    /// Answer `request` incrementally.
    ///
    /// The returned channel yields text deltas, at most one error event, and
    /// always ends with [`StreamEvent::Done`] unless the receiver is dropped,
    /// in which case the producer stops pulling from the provider.
    pub fn stream_query(self: &Arc<Self>, request: QueryRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let this = Arc::clone(self);
        tokio::spawn(async move { this.produce_stream(request, tx).await });
        rx
    }

    async fn produce_stream(&self, request: QueryRequest, tx: mpsc::Sender<StreamEvent>) {
        match self.stream_answer(&request, &tx).await {
            Ok(()) => {}
            Err(StreamStop::Disconnected) => {
                tracing::debug!(workspace = %request.workspace_name, "stream consumer disconnected");
                return;
            }
            Err(StreamStop::Failed(e)) => {
                tracing::error!(kind = e.kind(), error = %e, "streamed query failed");
                if send(&tx, StreamEvent::Error(e.to_string())).await.is_err() {
                    return;
                }
            }
        }
        let _ = send(&tx, StreamEvent::Done).await;
    }

    async fn stream_answer(
        &self,
        request: &QueryRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> std::result::Result<(), StreamStop> {
        request.validate()?;

        let verdict = unless_closed(tx, self.compliance.check(&request.user_query)).await??;
        if !verdict.accepted {
            return send(tx, StreamEvent::Delta(verdict.message)).await;
        }

        let analysis = unless_closed(tx, self.analyzer.analyze(&request.user_query)).await??;
        let folder_structure = unless_closed(tx, self.folder_structure(request)).await?;
        let inputs = prompt_inputs(&analysis, &folder_structure);

        let prompt = if analysis.use_rag {
            let docs = unless_closed(tx, self.retrieve(request, &analysis)).await??;
            prompts::streaming_rag_prompt(&inputs, &docs, self.settings.stream_context_docs)
        } else {
            prompts::streaming_direct_prompt(&inputs)
        };

        let messages = prompt.messages(&analysis.reformulated_query.reformulated_query);
        let mut stream = unless_closed(tx, self.generator.chat_stream(&messages)).await??;
        while let Some(item) = unless_closed(tx, stream.next()).await? {
            let text = item?;
            if !text.is_empty() {
                send(tx, StreamEvent::Delta(text)).await?;
            }
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        request: &QueryRequest,
        analysis: &QueryAnalysisResult,
    ) -> Result<Vec<RetrievedDocument>> {
        let namespace = Namespace::new(&request.email, &request.workspace_name)?;
        let query = prompts::retrieval_query(
            &analysis.original_query,
            &analysis.reformulated_query.reformulated_query,
            &request.current_file_path,
            &request.current_file_content,
        );
        let params = RetrievalParams {
            top_k: analysis.top_k,
            top_n: analysis.top_n,
            alpha: self.settings.alpha,
        };
        let docs = self.retriever.retrieve(&query, &namespace, params).await?;
        tracing::debug!(%namespace, documents = docs.len(), "context retrieved");
        Ok(docs)
    }

    /// Cached folder structure, or an empty string when there is none.
    async fn folder_structure(&self, request: &QueryRequest) -> String {
        match self
            .folders
            .load(&request.email, &request.workspace_name)
            .await
        {
            Ok(Some(structure)) => structure,
            Ok(None) => {
                tracing::debug!(workspace = %request.workspace_name, "no folder structure cached");
                String::new()
            }
            Err(e) => {
                tracing::warn!(workspace = %request.workspace_name, error = %e, "folder structure lookup failed");
                String::new()
            }
        }
    }
}

fn prompt_inputs<'a>(
    analysis: &'a QueryAnalysisResult,
    folder_structure: &'a str,
) -> PromptInputs<'a> {
    PromptInputs {
        query: &analysis.original_query,
        context: &analysis.reformulated_query.context,
        error: &analysis.reformulated_query.error,
        folder_structure,
    }
}
