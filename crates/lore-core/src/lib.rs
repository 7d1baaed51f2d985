//! Retrieval-augmented generation core: chunking, ingestion, retrieval and
//! prompt composition.

pub mod bootstrap;
pub mod catalog;
pub mod chat;
pub mod chunker;
pub mod composer;
pub mod config;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod vault;

mod normalize;

pub use bootstrap::{App, AppBuilder};
pub use catalog::{Catalog, KnowledgeBaseDraft, KnowledgeBaseSummary};
pub use chat::{AnswerStream, ChatAnswer, ChatRequest, ChatService};
pub use chunker::Chunker;
pub use composer::{Citation, PromptComposer};
pub use config::Config;
pub use error::RagError;
pub use ingest::{IngestionRequest, IngestionResult, IngestionService};
pub use loader::{LoaderRegistry, TextLoader};
