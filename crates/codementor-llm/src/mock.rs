//! Test-only mock providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::LlmError;
use crate::embed::{EmbeddingProvider, InputType};
use crate::provider::{BoxFuture, ChatStream, LlmProvider, Message};
use crate::rerank::{RerankHit, RerankProvider};

fn mock_error() -> LlmError {
    LlmError::ProviderUnavailable {
        provider: "mock".into(),
        detail: "mock failure".into(),
    }
}

/// Scripted chat provider. Responses are served in order, then `default_response`.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
    pub default_response: String,
    pub fail_chat: bool,
    /// Yield an error after this many streamed segments.
    pub stream_error_after: Option<usize>,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            fail_chat: false,
            stream_error_after: None,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stream_error_after(mut self, segments: usize) -> Self {
        self.stream_error_after = Some(segments);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Messages of every call so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(mock_error());
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let response = self.chat(messages).await?;
        let mut chunks: Vec<Result<String, LlmError>> =
            response.chars().map(|c| Ok(c.to_string())).collect();
        if let Some(after) = self.stream_error_after {
            chunks.truncate(after);
            chunks.push(Err(mock_error()));
        }
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model(&self) -> &str {
        "mock-model"
    }
}

/// Deterministic embedder that tracks call count and peak concurrency.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    delay_ms: u64,
    fail: bool,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay_ms: 0,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `embed` calls observed running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    /// The vector this embedder produces for `text`.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed: u32 = text.bytes().map(u32::from).sum();
        (0..self.dimension)
            .map(|i| {
                let i = u32::try_from(i).unwrap_or(u32::MAX);
                #[allow(clippy::cast_precision_loss)]
                let v = (seed.wrapping_add(i) % 97) as f32 / 97.0;
                v
            })
            .collect()
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn embed(
        &self,
        texts: Vec<String>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LlmError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(mock_error());
            }
            self.batches.lock().unwrap().push(texts.clone());
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

/// Keeps submission order and assigns descending scores.
#[derive(Debug, Clone, Default)]
pub struct MockReranker {
    fail: bool,
    calls: Arc<AtomicUsize>,
    reverse: bool,
}

impl MockReranker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Rank the last submitted document first.
    #[must_use]
    pub fn reversed() -> Self {
        Self {
            reverse: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RerankProvider for MockReranker {
    fn rerank(
        &self,
        _query: String,
        documents: Vec<String>,
        top_n: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, LlmError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(mock_error());
            }
            let mut order: Vec<usize> = (0..documents.len()).collect();
            if self.reverse {
                order.reverse();
            }
            #[allow(clippy::cast_precision_loss)]
            let hits = order
                .into_iter()
                .take(top_n)
                .enumerate()
                .map(|(rank, index)| RerankHit {
                    index,
                    relevance_score: 1.0 - rank as f32 * 0.01,
                })
                .collect();
            Ok(hits)
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
