use std::future::Future;
use std::time::Instant;

use super::PipelineError;
use super::step::Step;

/// A composed sequence of stages that can be driven as one unit.
pub trait Stages: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn drive(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, PipelineError>> + Send;
}

async fn timed<S: Step>(stage: &S, input: S::Input) -> Result<S::Output, PipelineError> {
    let started = Instant::now();
    let result = stage.run(input).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => tracing::debug!(stage = stage.name(), elapsed_ms, "stage complete"),
        Err(e) => tracing::warn!(stage = stage.name(), elapsed_ms, error = %e, "stage failed"),
    }
    result
}

pub struct First<S>(S);

impl<S: Step> Stages for First<S> {
    type Input = S::Input;
    type Output = S::Output;

    async fn drive(&self, input: S::Input) -> Result<S::Output, PipelineError> {
        timed(&self.0, input).await
    }
}

pub struct Then<Before, S> {
    before: Before,
    stage: S,
}

impl<Before, S> Stages for Then<Before, S>
where
    Before: Stages,
    S: Step<Input = Before::Output>,
{
    type Input = Before::Input;
    type Output = S::Output;

    async fn drive(&self, input: Before::Input) -> Result<S::Output, PipelineError> {
        let handoff = self.before.drive(input).await?;
        timed(&self.stage, handoff).await
    }
}

/// Strictly sequential chain of stages; a failing stage stops the chain.
pub struct Pipeline<S> {
    stages: S,
}

impl Pipeline<()> {
    #[must_use]
    pub fn begin<S: Step>(stage: S) -> Pipeline<First<S>> {
        Pipeline {
            stages: First(stage),
        }
    }
}

impl<S> Pipeline<S> {
    #[must_use]
    pub fn then<T: Step>(self, stage: T) -> Pipeline<Then<S, T>> {
        Pipeline {
            stages: Then {
                before: self.stages,
                stage,
            },
        }
    }
}

impl<S: Stages> Pipeline<S> {
    /// # Errors
    ///
    /// Returns the `PipelineError` of the first stage that fails.
    pub async fn run(&self, input: S::Input) -> Result<S::Output, PipelineError> {
        self.stages.drive(input).await
    }
}
