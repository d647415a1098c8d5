use std::sync::Arc;

use codementor_llm::{LlmError, LlmProvider};
use serde::Serialize;

use super::decision::{RetrievalLimits, parse_decision};
use super::{IntentAnalysis, PreprocessedQuery, QueryAnalysisResult, ReformulatedQuery};
use crate::pipeline::{PipelineError, Step};
use crate::prompts;

/// Raw message split into question, code context and error output.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub original: String,
    pub preprocessed: PreprocessedQuery,
}

#[derive(Debug, Clone)]
pub struct Classified {
    pub original: String,
    pub preprocessed: PreprocessedQuery,
    pub intent: IntentAnalysis,
}

#[derive(Debug, Clone)]
pub struct Reformulated {
    pub original: String,
    pub preprocessed: PreprocessedQuery,
    pub intent: IntentAnalysis,
    pub reformulated: ReformulatedQuery,
}

fn to_json<T: Serialize>(stage: &'static str, value: &T) -> Result<String, PipelineError> {
    serde_json::to_string(value).map_err(|e| PipelineError::InvalidOutput {
        stage,
        detail: e.to_string(),
    })
}

pub struct PreprocessStep<P> {
    provider: Arc<P>,
}

impl<P> PreprocessStep<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: LlmProvider> Step for PreprocessStep<P> {
    type Input = String;
    type Output = Preprocessed;

    fn name(&self) -> &'static str {
        "preprocess"
    }

    async fn run(&self, raw: String) -> Result<Preprocessed, PipelineError> {
        let messages = prompts::preprocess_messages(&raw);
        let preprocessed = match self.provider.chat_typed::<PreprocessedQuery>(&messages).await {
            Ok(parsed) => parsed,
            Err(LlmError::StructuredParse(detail)) => {
                tracing::warn!(%detail, "preprocess output unreadable, using fallback");
                PreprocessedQuery::fallback(&raw)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Preprocessed {
            original: raw,
            preprocessed,
        })
    }
}

pub struct IntentStep<P> {
    provider: Arc<P>,
}

impl<P> IntentStep<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: LlmProvider> Step for IntentStep<P> {
    type Input = Preprocessed;
    type Output = Classified;

    fn name(&self) -> &'static str {
        "intent"
    }

    async fn run(&self, input: Preprocessed) -> Result<Classified, PipelineError> {
        let messages = prompts::intent_messages(&input.preprocessed.user_query);
        let mut intent: IntentAnalysis = self.provider.chat_typed(&messages).await?;
        intent.specificity = intent.specificity.clamp(1, 5);
        tracing::debug!(category = ?intent.category, specificity = intent.specificity, "intent classified");
        Ok(Classified {
            original: input.original,
            preprocessed: input.preprocessed,
            intent,
        })
    }
}

pub struct ReformulateStep<P> {
    provider: Arc<P>,
}

impl<P> ReformulateStep<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: LlmProvider> Step for ReformulateStep<P> {
    type Input = Classified;
    type Output = Reformulated;

    fn name(&self) -> &'static str {
        "reformulate"
    }

    async fn run(&self, input: Classified) -> Result<Reformulated, PipelineError> {
        let messages = prompts::reformulate_messages(
            &to_json(self.name(), &input.preprocessed)?,
            &to_json(self.name(), &input.intent)?,
        );
        let mut reformulated: ReformulatedQuery = self.provider.chat_typed(&messages).await?;
        if reformulated.reformulated_query.trim().is_empty() {
            return Err(PipelineError::InvalidOutput {
                stage: self.name(),
                detail: "empty reformulated_query".into(),
            });
        }
        reformulated.fill_missing(&input.preprocessed);
        Ok(Reformulated {
            original: input.original,
            preprocessed: input.preprocessed,
            intent: input.intent,
            reformulated,
        })
    }
}

pub struct RagDecisionStep<P> {
    provider: Arc<P>,
    limits: RetrievalLimits,
}

impl<P> RagDecisionStep<P> {
    pub fn new(provider: Arc<P>, limits: RetrievalLimits) -> Self {
        Self { provider, limits }
    }
}

impl<P: LlmProvider> Step for RagDecisionStep<P> {
    type Input = Reformulated;
    type Output = QueryAnalysisResult;

    fn name(&self) -> &'static str {
        "rag_decision"
    }

    async fn run(&self, input: Reformulated) -> Result<QueryAnalysisResult, PipelineError> {
        let messages = prompts::rag_decision_messages(
            &input.original,
            &input.reformulated.reformulated_query,
            &to_json(self.name(), &input.intent)?,
        );
        let reply = self.provider.chat(&messages).await?;
        let decision = parse_decision(
            &reply,
            &input.original,
            &input.reformulated.reformulated_query,
            &self.limits,
        );
        tracing::info!(
            use_rag = decision.use_rag,
            top_k = decision.top_k,
            top_n = decision.top_n,
            "retrieval decided"
        );
        Ok(QueryAnalysisResult {
            original_query: input.original,
            preprocessed_query: input.preprocessed,
            intent_analysis: input.intent,
            reformulated_query: input.reformulated,
            use_rag: decision.use_rag,
            reasoning: decision.reasoning,
            top_k: decision.top_k,
            top_n: decision.top_n,
        })
    }
}
