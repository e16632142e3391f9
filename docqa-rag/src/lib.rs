//! docqa-rag: retrieval-augmented question answering over ingested documents
//!
//! Ties the vector store from `docqa-retriever` to an OpenAI-compatible chat
//! model. A [`RagChain`] retrieves the top-k chunks for a question, fills the
//! prompt template with them and asks the model; [`RagService`] wraps the
//! whole lifecycle (ingest, answer, delete, status) for presentation layers.
//!
//! ```rust,no_run
//! use docqa_rag::{QaOptions, RagService};
//! use docqa_retriever::RetrieverConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = RagService::from_config(RetrieverConfig::from_env()?)?;
//! let answer = service
//!     .answer_question("How much wind capacity was added?", &QaOptions::default())
//!     .await?;
//! println!("{}", answer.answer);
//! for doc in &answer.source_documents {
//!     println!("  source: {}", doc.source().unwrap_or("unknown"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod service;

pub use chain::{ChainState, QaAnswer, QaOptions, RagChain, Retriever, SharedStore};
pub use error::{LlmError, RagError, Result};
pub use llm::{
    ChatModel, EnvLlmFactory, LlmConfig, LlmFactory, LlmOverrides, LlmProvider, OpenAiChatModel,
    test_connection,
};
pub use prompt::{PromptTemplate, RAG_PROMPT_TEMPLATE};
pub use service::{IngestReport, RagService, ServiceStatus};
