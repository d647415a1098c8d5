//! HTTP surface for query, streaming query, resync and rewrite with bearer auth.

mod envelope;
mod error;
mod handlers;
mod router;
mod server;

pub use error::{GatewayError, Result};
pub use server::GatewayServer;
