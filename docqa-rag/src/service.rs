//! Request/response facade for presentation layers
//!
//! [`RagService`] owns the shared vector store and builds a fresh [`RagChain`]
//! for every question, so no conversation state lives here.

use crate::chain::{QaAnswer, QaOptions, RagChain, SharedStore};
use crate::error::{RagError, Result};
use crate::llm::{EnvLlmFactory, LlmFactory};
use crate::prompt::PromptTemplate;
use docqa_embed::EmbeddingMode;
use docqa_retriever::{
    CollectionInfo, DeletionReport, Document, DocumentProcessor, EmbeddedBatch, RetrieverConfig,
    VectorStoreManager,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of [`RagService::ingest`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub documents: usize,
    pub chunks: usize,
    /// True when this call created the collection
    pub created: bool,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub persist_directory: PathBuf,
    pub collection_name: String,
    pub embedding_provider: String,
    pub embedding_mode: EmbeddingMode,
    /// `None` until something has been ingested
    pub collection: Option<CollectionInfo>,
}

pub struct RagService {
    config: RetrieverConfig,
    processor: DocumentProcessor,
    store: SharedStore,
    factory: Arc<dyn LlmFactory>,
    prompt: PromptTemplate,
}

impl RagService {
    pub fn new(
        config: RetrieverConfig,
        store: VectorStoreManager,
        factory: Arc<dyn LlmFactory>,
    ) -> Result<Self> {
        let processor = DocumentProcessor::from_config(&config)?;
        Ok(Self {
            config,
            processor,
            store: Arc::new(RwLock::new(store)),
            factory,
            prompt: PromptTemplate::default(),
        })
    }

    /// Service with the configured embedding chain and an environment-backed LLM factory.
    pub fn from_config(config: RetrieverConfig) -> Result<Self> {
        let store = VectorStoreManager::from_config(&config)?;
        Self::new(config, store, Arc::new(EnvLlmFactory))
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Open the configured collection. Returns false when none exists yet.
    pub async fn load_collection(&self) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store
            .load_collection(&self.config.collection_name)
            .await?
            .is_some())
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.store.read().await.has_active_collection() {
            return Ok(());
        }
        if self.load_collection().await? {
            Ok(())
        } else {
            Err(RagError::index_not_found(&self.config.collection_name))
        }
    }

    /// Load, split and add files or directories, creating the collection if needed.
    ///
    /// Unreadable files inside a directory are skipped and listed; a named file
    /// that cannot be loaded fails the whole call. Chunks are embedded before
    /// the store lock is taken, so readers are not held up by the provider.
    pub async fn ingest(&self, paths: &[PathBuf]) -> Result<IngestReport> {
        let load = self.processor.load_paths(paths).await?;
        let chunks = self.processor.split(&load.documents);

        let mut report = IngestReport {
            collection: self.config.collection_name.clone(),
            documents: load.documents.len(),
            chunks: chunks.len(),
            created: false,
            skipped: load.skipped.iter().map(ToString::to_string).collect(),
        };
        if chunks.is_empty() {
            tracing::warn!("No content found to ingest");
            return Ok(report);
        }

        let embedder = self.store.read().await.embedder();
        let batch = EmbeddedBatch::embed(embedder.as_ref(), &chunks).await?;

        let mut store = self.store.write().await;
        report.created = store
            .store_batch(batch, &self.config.collection_name)
            .await?;
        drop(store);

        tracing::info!(
            collection = %report.collection,
            documents = report.documents,
            chunks = report.chunks,
            created = report.created,
            "Ingested documents"
        );
        Ok(report)
    }

    /// Answer `question` with a chain built for this request only.
    pub async fn answer_question(&self, question: &str, options: &QaOptions) -> Result<QaAnswer> {
        self.ensure_loaded().await?;
        let mut chain = self.new_chain();
        chain.setup_qa_chain(options).await?;
        chain.answer_question(question).await
    }

    pub async fn relevant_documents(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        self.ensure_loaded().await?;
        self.new_chain().get_relevant_documents(query, k).await
    }

    /// Delete the collection and reset its directory.
    pub async fn delete_collection(&self) -> DeletionReport {
        let mut store = self.store.write().await;
        store.delete_collection(&self.config.collection_name).await
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let loaded = match self.ensure_loaded().await {
            Ok(()) => true,
            Err(RagError::IndexNotFound { .. }) => false,
            Err(e) => return Err(e),
        };

        let store = self.store.read().await;
        let collection = if loaded {
            store.collection_info().await?
        } else {
            None
        };
        Ok(ServiceStatus {
            persist_directory: store.persist_directory().to_path_buf(),
            collection_name: self.config.collection_name.clone(),
            embedding_provider: store.embedding_provider_name().to_string(),
            embedding_mode: store.embedding_mode(),
            collection,
        })
    }

    fn new_chain(&self) -> RagChain {
        RagChain::new(self.store())
            .with_factory(Arc::clone(&self.factory))
            .with_prompt(self.prompt.clone())
    }
}
