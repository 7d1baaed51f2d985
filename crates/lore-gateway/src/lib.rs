//! HTTP gateway for ingestion, knowledge-base management and chat with bearer
//! auth and a health endpoint.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use server::GatewayServer;
