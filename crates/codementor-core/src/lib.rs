//! Query analysis, compliance, prompt assembly and response orchestration.

pub mod analysis;
pub mod bootstrap;
pub mod compliance;
pub mod config;
pub mod error;
pub mod indexing;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod request;
pub mod rewrite;
pub mod secret;
pub mod stream;

pub use bootstrap::{Services, build_services};
pub use config::Config;
pub use error::{CoreError, Result};
pub use orchestrator::{OrchestratorSettings, ResponseOrchestrator, RoleProviders};
pub use request::{
    FileUploadRequest, QueryAnswer, QueryRequest, QueryResponse, ResyncResponse, RewriteRequest,
};
pub use stream::StreamEvent;
