//! Typed sequential stage chain used by query analysis.

pub mod chain;
pub mod step;

pub use chain::Pipeline;
pub use step::Step;

use codementor_llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{stage} produced unusable output: {detail}")]
    InvalidOutput { stage: &'static str, detail: String },
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(e) => e.kind(),
            Self::InvalidOutput { .. } => "provider_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct AddSuffix {
        suffix: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Step for AddSuffix {
        type Input = String;
        type Output = String;

        fn name(&self) -> &'static str {
            "add_suffix"
        }

        async fn run(&self, input: Self::Input) -> Result<Self::Output, PipelineError> {
            self.log.lock().unwrap().push(self.suffix.clone());
            Ok(format!("{input}{}", self.suffix))
        }
    }

    struct Length;

    impl Step for Length {
        type Input = String;
        type Output = usize;

        fn name(&self) -> &'static str {
            "length"
        }

        async fn run(&self, input: Self::Input) -> Result<Self::Output, PipelineError> {
            Ok(input.len())
        }
    }

    struct Reject;

    impl Step for Reject {
        type Input = String;
        type Output = String;

        fn name(&self) -> &'static str {
            "reject"
        }

        async fn run(&self, _input: Self::Input) -> Result<Self::Output, PipelineError> {
            Err(PipelineError::InvalidOutput {
                stage: "reject",
                detail: "boom".into(),
            })
        }
    }

    fn suffix(s: &str, log: &Arc<Mutex<Vec<String>>>) -> AddSuffix {
        AddSuffix {
            suffix: s.into(),
            log: Arc::clone(log),
        }
    }

    #[tokio::test]
    async fn stages_run_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let out = Pipeline::begin(suffix("a", &log))
            .then(suffix("b", &log))
            .then(suffix("c", &log))
            .run("x".into())
            .await
            .unwrap();
        assert_eq!(out, "xabc");
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn output_type_changes_along_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let out = Pipeline::begin(suffix("abc", &log))
            .then(Length)
            .run(String::new())
            .await
            .unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn failing_stage_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::begin(suffix("a", &log))
            .then(Reject)
            .then(suffix("never", &log))
            .run("x".into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.kind(), "provider_error");
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn provider_failure_kind_passes_through() {
        let err = PipelineError::from(LlmError::ProviderUnavailable {
            provider: "openai".into(),
            detail: "refused".into(),
        });
        assert_eq!(err.kind(), "provider_unavailable");
    }
}
