//! Provider adapters: generation, embedding and rerank over remote HTTP APIs.

pub mod any;
pub mod claude;
pub mod compatible;
pub mod embed;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod rerank;
mod sse;
pub mod usage;

pub use any::AnyProvider;
pub use embed::{EmbeddingProvider, InputType};
pub use error::LlmError;
pub use provider::{BoxFuture, ChatStream, LlmProvider, Message, Role};
pub use rerank::{RerankHit, RerankProvider};
pub use usage::{SharedUsageSink, UsageRecord, UsageSink};
