//! Four-stage query analysis: preprocess, intent, reformulate, retrieval decision.

mod decision;
mod stages;

pub use decision::{RagDecision, RetrievalLimits, parse_decision};
pub use stages::{
    Classified, IntentStep, Preprocessed, PreprocessStep, RagDecisionStep, ReformulateStep,
    Reformulated,
};

use std::sync::Arc;

use codementor_llm::LlmProvider;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::chain::{First, Then};
use crate::pipeline::{Pipeline, PipelineError};

const FALLBACK_QUERY: &str = "How do I fix the issue in my code?";

/// Accepts a string, `null` or any other JSON value (rendered as JSON text).
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PreprocessedQuery {
    pub user_query: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub context: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: String,
}

impl PreprocessedQuery {
    /// Used when the provider answer cannot be decoded: the whole message becomes context.
    #[must_use]
    pub fn fallback(raw_input: &str) -> Self {
        Self {
            user_query: FALLBACK_QUERY.into(),
            context: raw_input.into(),
            error: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum IntentCategory {
    #[serde(alias = "code-understanding", alias = "code_understanding")]
    Understanding,
    #[serde(alias = "code-modification", alias = "code_modification")]
    Modification,
    #[serde(alias = "codebase-navigation", alias = "codebase_navigation")]
    Navigation,
    #[serde(alias = "new-feature-implementation", alias = "new_feature")]
    NewFeature,
    Debugging,
    #[serde(alias = "general-programming-question", alias = "general_question")]
    GeneralQuestion,
    #[serde(alias = "non_programming")]
    NonProgramming,
    #[serde(alias = "implement-whole-route", alias = "whole_route_implementation")]
    WholeRouteImplementation,
    #[serde(alias = "implement-whole-app", alias = "whole_app_implementation")]
    WholeAppImplementation,
}

fn default_specificity() -> u8 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntentAnalysis {
    pub category: IntentCategory,
    /// Files, classes and functions named by the query.
    #[serde(default)]
    pub entities: Vec<String>,
    /// 1 (vague) to 5 (precise).
    #[serde(default = "default_specificity")]
    pub specificity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReformulatedQuery {
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_query: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub context: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: String,
    #[serde(alias = "reformulared_query")]
    pub reformulated_query: String,
}

impl ReformulatedQuery {
    fn fill_missing(&mut self, preprocessed: &PreprocessedQuery) {
        if self.user_query.is_empty() {
            self.user_query.clone_from(&preprocessed.user_query);
        }
        if self.context.is_empty() {
            self.context.clone_from(&preprocessed.context);
        }
        if self.error.is_empty() {
            self.error.clone_from(&preprocessed.error);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysisResult {
    pub original_query: String,
    pub preprocessed_query: PreprocessedQuery,
    pub intent_analysis: IntentAnalysis,
    pub reformulated_query: ReformulatedQuery,
    pub use_rag: bool,
    pub reasoning: String,
    pub top_k: usize,
    pub top_n: usize,
}

type AnalysisStages<P> = Then<
    Then<Then<First<PreprocessStep<P>>, IntentStep<P>>, ReformulateStep<P>>,
    RagDecisionStep<P>,
>;

/// Runs the four analysis stages in order against one provider.
pub struct QueryAnalyzer<P> {
    pipeline: Pipeline<AnalysisStages<P>>,
}

impl<P: LlmProvider> QueryAnalyzer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, limits: RetrievalLimits) -> Self {
        let pipeline = Pipeline::begin(PreprocessStep::new(Arc::clone(&provider)))
            .then(IntentStep::new(Arc::clone(&provider)))
            .then(ReformulateStep::new(Arc::clone(&provider)))
            .then(RagDecisionStep::new(provider, limits));
        Self { pipeline }
    }

    /// # Errors
    ///
    /// Returns the first stage failure. Unreadable preprocess output is not a
    /// failure; it falls back to treating the whole message as context.
    pub async fn analyze(&self, query: &str) -> Result<QueryAnalysisResult, PipelineError> {
        self.pipeline.run(query.to_owned()).await
    }
}
