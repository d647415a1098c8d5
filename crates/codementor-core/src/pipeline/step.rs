use std::future::Future;

use super::PipelineError;

/// One typed stage. The output of a stage is the input of the next one.
pub trait Step: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// Stage label used in logs.
    fn name(&self) -> &'static str;

    fn run(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, PipelineError>> + Send;
}
