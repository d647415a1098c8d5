use codementor_index::IndexError;
use codementor_llm::LlmError;

use crate::pipeline::PipelineError;

/// Failure of a query, rewrite or resync use case.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Stable snake_case failure class reported to callers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(e) => e.kind(),
            Self::Index(e) => e.kind(),
            Self::Pipeline(e) => e.kind(),
            Self::InvalidRequest(_) => "invalid_argument",
        }
    }
}
