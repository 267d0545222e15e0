//! Question answering over extracted document text.
//!
//! Text is split into word-bounded chunks, embedded, and indexed for exact L2
//! search. Indexes are cached by a SHA-256 fingerprint of the source, in
//! memory and on disk. Retrieved chunks are assembled into a prompt that
//! respects a token budget and optionally handed to a generator.

pub mod cache;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embedder;
pub mod error;
pub mod extract;
pub mod llm;
pub mod retriever;
pub mod utils;
pub mod vector_db;

pub use cache::{CachedIndex, IndexCache};
pub use config::Config;
pub use context::{AssembledContext, BudgetOverflow, ContextAssembler, TokenCounter};
pub use embedder::Embedder;
pub use error::{RagError, Result, Stage};
pub use llm::Generator;
pub use retriever::{Answer, Retrieval, RetrievedChunk, Retriever};
pub use vector_db::VectorIndex;
