//! The vector store manager: collection lifecycle, search and deletion
//!
//! A manager owns one persist directory and one embedding provider, fixed for
//! its lifetime. At most one collection handle is open at a time; opening
//! another closes the previous one first.
//!
//! Scores are cosine similarities: higher is closer, and both search methods
//! return results best first.

use crate::config::RetrieverConfig;
use crate::deletion::{self, DeletionOptions, DeletionReport};
use crate::documents::Document;
use crate::error::VectorStoreError;
use crate::storage::{self, CollectionIndex, CollectionInfo, RecordId, StoredRecord};
use docqa_embed::{EmbeddingMode, EmbeddingProvider, ProviderChain};
use half::f16;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Result<T> = std::result::Result<T, VectorStoreError>;

/// Documents paired with their vectors, ready to be stored.
///
/// Embedding needs no store state, so a batch can be built before taking any
/// lock on the manager and handed over afterwards.
#[derive(Debug, Clone)]
pub struct EmbeddedBatch {
    documents: Vec<Document>,
    embeddings: Vec<Vec<f16>>,
    provider: String,
}

impl EmbeddedBatch {
    pub async fn embed(embedder: &dyn EmbeddingProvider, documents: &[Document]) -> Result<Self> {
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let result = embedder.embed_texts(&texts).await?;
        if result.len() != documents.len() {
            return Err(VectorStoreError::storage(
                "embed documents",
                anyhow::anyhow!(
                    "provider returned {} vectors for {} documents",
                    result.len(),
                    documents.len()
                ),
            ));
        }
        let provider = result
            .provider
            .unwrap_or_else(|| embedder.provider_name().to_string());
        Ok(Self {
            documents: documents.to_vec(),
            embeddings: result.embeddings,
            provider,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Name of the provider that produced the vectors.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Vector length, `None` for an empty batch.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }
}

/// An open collection.
#[derive(Debug, Clone)]
pub struct Collection {
    index: CollectionIndex,
    info: CollectionInfo,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn dimension(&self) -> usize {
        self.info.dimension
    }

    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }
}

/// Read-only search handle on one collection.
///
/// Cloning is cheap and a searcher needs no access to the manager, so callers
/// can search without holding any lock on it.
#[derive(Clone)]
pub struct CollectionSearcher {
    collection: String,
    dimension: usize,
    index: CollectionIndex,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for CollectionSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSearcher")
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .field("embedder", &self.embedder.provider_name())
            .finish()
    }
}

impl CollectionSearcher {
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Top `k` documents with their cosine similarity, best first.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        if k == 0 {
            return Err(VectorStoreError::InvalidK { k });
        }

        let query_vector = self.embedder.embed_text(query).await?;
        check_dimension(&self.collection, self.dimension, &query_vector)?;

        let records = self
            .index
            .records(&self.collection)
            .await
            .map_err(|e| VectorStoreError::storage("read collection records", e))?;
        let ranked = storage::rank(records, &query_vector, k);

        tracing::debug!(
            collection = %self.collection,
            k,
            results = ranked.len(),
            "Similarity search"
        );
        Ok(ranked
            .into_iter()
            .map(|(record, score)| (to_document(record), score))
            .collect())
    }

    /// Top `k` documents, best first.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        Ok(self
            .similarity_search_with_score(query, k)
            .await?
            .into_iter()
            .map(|(document, _)| document)
            .collect())
    }
}

/// Owns the persisted index of one directory and the provider that fills it.
pub struct VectorStoreManager {
    persist_directory: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    active: Option<Collection>,
    deletion: DeletionOptions,
}

impl std::fmt::Debug for VectorStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreManager")
            .field("persist_directory", &self.persist_directory)
            .field("embedder", &self.embedder.provider_name())
            .field("active", &self.active.as_ref().map(Collection::name))
            .finish()
    }
}

impl VectorStoreManager {
    pub fn new(persist_directory: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            persist_directory: persist_directory.into(),
            embedder,
            active: None,
            deletion: DeletionOptions::default(),
        }
    }

    /// Build with the provider chain selected from `config.embed`.
    pub fn from_config(config: &RetrieverConfig) -> Result<Self> {
        let chain = ProviderChain::from_config(&config.embed)?;
        Ok(Self::new(&config.persist_directory, Arc::new(chain)))
    }

    pub fn with_deletion_options(mut self, deletion: DeletionOptions) -> Self {
        self.deletion = deletion;
        self
    }

    pub fn persist_directory(&self) -> &Path {
        &self.persist_directory
    }

    pub fn has_active_collection(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_collection(&self) -> Option<&Collection> {
        self.active.as_ref()
    }

    pub fn embedding_mode(&self) -> EmbeddingMode {
        self.embedder.mode()
    }

    pub fn embedding_provider_name(&self) -> &str {
        self.embedder.provider_name()
    }

    /// The provider this manager embeds with, for embedding outside a store lock.
    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    fn active_or_err(&self) -> Result<&Collection> {
        self.active.as_ref().ok_or(VectorStoreError::NoActiveCollection)
    }

    async fn release_active(&mut self) {
        if let Some(previous) = self.active.take() {
            tracing::debug!(collection = previous.name(), "Closing collection handle");
            previous.index.close().await;
        }
    }

    async fn insert(&self, collection: &Collection, batch: EmbeddedBatch) -> Result<Vec<RecordId>> {
        for embedding in &batch.embeddings {
            check_dimension(collection.name(), collection.dimension(), embedding)?;
        }
        let records: Vec<StoredRecord> = batch
            .documents
            .into_iter()
            .zip(batch.embeddings)
            .map(|(document, embedding)| StoredRecord {
                id: None,
                content: document.content,
                metadata: document.metadata,
                embedding,
            })
            .collect();

        collection
            .index
            .insert_records(collection.name(), &records)
            .await
            .map_err(|e| VectorStoreError::storage("write records", e))
    }

    async fn refresh_active(&mut self) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            if let Some(info) = active
                .index
                .collection_info(&active.info.name)
                .await
                .map_err(|e| VectorStoreError::storage("read collection info", e))?
            {
                active.info = info;
            }
        }
        Ok(())
    }

    /// Embed `documents` and store them in collection `name`, creating it if needed.
    ///
    /// An existing collection of the same name is appended to and keeps its dimension.
    pub async fn create_collection(&mut self, documents: &[Document], name: &str) -> Result<&Collection> {
        let batch = EmbeddedBatch::embed(self.embedder.as_ref(), documents).await?;
        self.create_collection_from(batch, name).await
    }

    /// Store an already embedded batch in collection `name`, creating it if needed.
    ///
    /// The collection records the provider that produced the batch.
    pub async fn create_collection_from(&mut self, batch: EmbeddedBatch, name: &str) -> Result<&Collection> {
        let dimension = batch
            .dimension()
            .unwrap_or_else(|| self.embedder.embedding_dimension());

        self.release_active().await;
        let index = CollectionIndex::open(&self.persist_directory)
            .await
            .map_err(|e| VectorStoreError::storage("open index", e))?;
        let info = index
            .ensure_collection(name, dimension, &batch.provider)
            .await
            .map_err(|e| VectorStoreError::storage("create collection", e))?;
        let collection = Collection { index, info };

        let documents = batch.len();
        let provider = batch.provider.clone();
        self.insert(&collection, batch).await?;
        tracing::info!(
            collection = name,
            documents,
            dimension = collection.dimension(),
            provider = %provider,
            "Created collection"
        );

        self.active = Some(collection);
        self.refresh_active().await?;
        self.active_or_err()
    }

    /// Open an existing collection. `None` if the directory, index or collection does not exist.
    pub async fn load_collection(&mut self, name: &str) -> Result<Option<&Collection>> {
        self.release_active().await;

        let exists = tokio::fs::try_exists(&self.persist_directory)
            .await
            .map_err(|e| VectorStoreError::Io {
                path: self.persist_directory.clone(),
                source: e,
            })?;
        if !exists {
            tracing::info!(path = %self.persist_directory.display(), "No vector store directory");
            return Ok(None);
        }

        let Some(index) = CollectionIndex::open_existing(&self.persist_directory)
            .await
            .map_err(|e| VectorStoreError::storage("open index", e))?
        else {
            return Ok(None);
        };
        let info = match index.collection_info(name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                index.close().await;
                return Ok(None);
            }
            Err(e) => {
                index.close().await;
                return Err(VectorStoreError::storage("read collection info", e));
            }
        };

        tracing::info!(
            collection = name,
            records = info.record_count,
            dimension = info.dimension,
            "Loaded collection"
        );
        self.active = Some(Collection { index, info });
        Ok(self.active.as_ref())
    }

    /// Embed and append documents to the active collection.
    pub async fn add_documents(&mut self, documents: &[Document]) -> Result<Vec<RecordId>> {
        self.active_or_err()?;
        let batch = EmbeddedBatch::embed(self.embedder.as_ref(), documents).await?;
        self.add_embedded(batch).await
    }

    /// Append an already embedded batch to the active collection.
    pub async fn add_embedded(&mut self, batch: EmbeddedBatch) -> Result<Vec<RecordId>> {
        let ids = self.insert(self.active_or_err()?, batch).await?;
        self.refresh_active().await?;
        tracing::info!(added = ids.len(), "Added documents");
        Ok(ids)
    }

    /// Append `batch` to collection `name`, opening or creating it as needed.
    ///
    /// Returns true when the collection was created by this call.
    pub async fn store_batch(&mut self, batch: EmbeddedBatch, name: &str) -> Result<bool> {
        let open = self.active.as_ref().is_some_and(|active| active.name() == name);
        if open || self.load_collection(name).await?.is_some() {
            self.add_embedded(batch).await?;
            Ok(false)
        } else {
            self.create_collection_from(batch, name).await?;
            Ok(true)
        }
    }

    /// Search handle on the active collection.
    pub fn searcher(&self) -> Result<CollectionSearcher> {
        let active = self.active_or_err()?;
        Ok(CollectionSearcher {
            collection: active.info.name.clone(),
            dimension: active.info.dimension,
            index: active.index.clone(),
            embedder: Arc::clone(&self.embedder),
        })
    }

    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        self.searcher()?.similarity_search(query, k).await
    }

    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        self.searcher()?.similarity_search_with_score(query, k).await
    }

    /// Fresh info for the active collection, if any.
    pub async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        match &self.active {
            Some(active) => active
                .index
                .collection_info(active.name())
                .await
                .map_err(|e| VectorStoreError::storage("read collection info", e)),
            None => Ok(None),
        }
    }

    /// The first `limit` documents of the active collection.
    pub async fn peek(&self, limit: usize) -> Result<Vec<Document>> {
        let active = self.active_or_err()?;
        let records = active
            .index
            .peek(active.name(), limit)
            .await
            .map_err(|e| VectorStoreError::storage("read collection records", e))?;
        Ok(records.into_iter().map(to_document).collect())
    }

    /// Close the active collection handle.
    pub async fn close(&mut self) {
        self.release_active().await;
    }

    /// Delete collection `name` and reset the persist directory to an empty, writable state.
    ///
    /// Never fails: every phase is recorded in the report. Deleting a
    /// collection that does not exist succeeds with an informational message.
    /// This can take several seconds when files stay locked.
    pub async fn delete_collection(&mut self, name: &str) -> DeletionReport {
        let mut report = DeletionReport::default();

        let handle = match self.active.take() {
            Some(active) => Some(active.index),
            None => match CollectionIndex::open_existing(&self.persist_directory).await {
                Ok(index) => index,
                Err(e) => {
                    report.warning(format!("Could not open index for deletion: {e:#}"));
                    None
                }
            },
        };

        match handle {
            Some(index) => {
                match index.drop_collection(name).await {
                    Ok(true) => report.message(format!("Deleted collection '{name}' from the index")),
                    Ok(false) => report.message(format!("Collection '{name}' was not in the index")),
                    Err(e) => report.warning(format!("Deleting collection '{name}' failed: {e:#}")),
                }
                index.close().await;
                drop(index);
                report.message("Closed index connections");
            }
            None => report.message("No open index handle"),
        }

        deletion::reset_directory(&self.persist_directory, &self.deletion, &mut report).await;

        if report.success {
            tracing::info!(collection = name, "Collection deleted");
        } else {
            tracing::error!(collection = name, errors = ?report.errors, "Collection deletion incomplete");
        }
        report
    }
}

fn check_dimension(collection: &str, expected: usize, vector: &[f16]) -> Result<()> {
    if vector.len() != expected {
        return Err(VectorStoreError::DimensionMismatch {
            collection: collection.to_string(),
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn to_document(record: StoredRecord) -> Document {
    Document {
        content: record.content,
        metadata: record.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deletion::RetryPolicy;
    use docqa_embed::HashEmbeddingProvider;
    use std::time::Duration;
    use tempfile::tempdir;

    fn manager(dir: &Path, dimension: usize) -> VectorStoreManager {
        VectorStoreManager::new(dir, Arc::new(HashEmbeddingProvider::new(dimension)))
            .with_deletion_options(DeletionOptions {
                retry: RetryPolicy::new(2, Duration::from_millis(10)),
                reclaim_pause: Duration::from_millis(1),
            })
    }

    fn docs(contents: &[&str]) -> Vec<Document> {
        contents
            .iter()
            .map(|c| Document::new(*c).with_metadata("source", "test.txt"))
            .collect()
    }

    #[tokio::test]
    async fn test_operations_require_active_collection() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let mut store = manager(&temp.path().join("store"), 16);

        assert!(matches!(
            store.add_documents(&docs(&["a"])).await,
            Err(VectorStoreError::NoActiveCollection)
        ));
        assert!(matches!(
            store.similarity_search("a", 1).await,
            Err(VectorStoreError::NoActiveCollection)
        ));
        assert!(store.collection_info().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let mut store = manager(&temp.path().join("store"), 64);
        let texts = ["Solar panels", "Wind turbines", "Hydro dams"];
        store.create_collection(&docs(&texts), "energy").await?;

        let results = store.similarity_search_with_score("Wind turbines", 3).await?;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0.content, "Wind turbines");
        assert!((results[0].1 - 1.0).abs() < 0.01);
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));

        let plain = store.similarity_search("Wind turbines", 3).await?;
        let scored: Vec<Document> = results.into_iter().map(|(d, _)| d).collect();
        assert_eq!(plain, scored);

        assert!(matches!(
            store.similarity_search("x", 0).await,
            Err(VectorStoreError::InvalidK { k: 0 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_is_absent() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let mut store = manager(&temp.path().join("never"), 8);
        assert!(store.load_collection("energy").await?.is_none());

        let mut store = manager(temp.path(), 8);
        assert!(store.load_collection("energy").await?.is_none());
        assert!(!store.has_active_collection());
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_and_append() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dir = temp.path().join("store");
        {
            let mut store = manager(&dir, 8);
            store.create_collection(&docs(&["one", "two"]), "energy").await?;
            store.close().await;
        }

        let mut store = manager(&dir, 8);
        let info = store.load_collection("energy").await?.map(|c| c.info().clone());
        assert_eq!(info.map(|i| i.record_count), Some(2));

        store.add_documents(&docs(&["three"])).await?;
        assert_eq!(store.collection_info().await?.map(|i| i.record_count), Some(3));
        assert_eq!(store.peek(2).await?.len(), 2);

        store.create_collection(&docs(&["four"]), "energy").await?;
        assert_eq!(store.collection_info().await?.map(|i| i.record_count), Some(4));
        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_mismatched_dimension_is_rejected() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dir = temp.path().join("store");
        let mut store = manager(&dir, 8);
        store.create_collection(&docs(&["one"]), "energy").await?;
        store.close().await;

        let mut wider = manager(&dir, 12);
        wider.load_collection("energy").await?;
        let err = wider.add_documents(&docs(&["two"])).await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 8,
                actual: 12,
                ..
            }
        ));
        assert_eq!(wider.collection_info().await?.map(|i| i.record_count), Some(1));
        wider.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_then_recreate() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dir = temp.path().join("store");
        let mut store = manager(&dir, 8);
        store.create_collection(&docs(&["one"]), "energy").await?;

        let report = store.delete_collection("energy").await;
        assert!(report.success, "{report:?}");
        assert!(!store.has_active_collection());
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir)?.count(), 0);

        store.create_collection(&docs(&["fresh"]), "energy").await?;
        assert_eq!(store.collection_info().await?.map(|i| i.record_count), Some(1));
        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let mut store = manager(&temp.path().join("gone"), 8);

        let first = store.delete_collection("energy").await;
        let second = store.delete_collection("energy").await;

        assert!(first.success && second.success);
        assert!(first.messages.iter().any(|m| m.contains("does not exist")));
        assert!(second.errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_open_handle() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dir = temp.path().join("store");
        {
            let mut store = manager(&dir, 8);
            store.create_collection(&docs(&["one"]), "energy").await?;
            store.close().await;
        }

        let mut store = manager(&dir, 8);
        let report = store.delete_collection("energy").await;
        assert!(report.success, "{report:?}");
        assert!(report.messages.iter().any(|m| m.contains("Deleted collection 'energy'")));
        Ok(())
    }
}
