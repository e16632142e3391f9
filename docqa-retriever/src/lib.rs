//! docqa-retriever: document ingestion and a persisted vector index
//!
//! This crate turns files into embedded chunks and answers similarity queries
//! over them. It owns the on-disk index and the protocol for resetting it.
//!
//! ## Key Modules
//!
//! - **[`documents`]**: loaders for `.txt`, `.pdf`, `.doc` and `.docx`, and the
//!   [`DocumentProcessor`] that loads and splits them
//! - **[`vector_store`]**: the [`VectorStoreManager`] collection lifecycle and search
//! - **[`storage`]**: SQLite tables for collections and records, cosine scoring
//! - **[`deletion`]**: retrying directory reset used by collection deletion
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docqa_retriever::{DocumentProcessor, RetrieverConfig, VectorStoreManager};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::from_env()?;
//! let processor = DocumentProcessor::from_config(&config)?;
//! let mut store = VectorStoreManager::from_config(&config)?;
//!
//! let chunks = processor.process(Path::new("docs")).await?;
//! store.create_collection(&chunks, &config.collection_name).await?;
//!
//! for (doc, score) in store.similarity_search_with_score("wind capacity", 3).await? {
//!     println!("{score:.3} {}", doc.content);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Files → Loaders → Splitter → Embedding chain → SQLite collection
//!                                                      ↓
//!                             Query → Embedding → Cosine ranking → Documents
//! ```

pub mod config;
pub mod deletion;
pub mod documents;
pub mod error;
pub mod storage;
pub mod vector_store;

pub use config::RetrieverConfig;
pub use deletion::{DeletionOptions, DeletionReport, RetryPolicy};
pub use documents::{DirectoryLoad, Document, DocumentProcessor};
pub use error::{ConfigError, DocumentProcessingError, VectorStoreError};
pub use storage::CollectionInfo;
pub use vector_store::{Collection, CollectionSearcher, EmbeddedBatch, VectorStoreManager};
