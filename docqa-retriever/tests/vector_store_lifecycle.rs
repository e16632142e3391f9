use anyhow::Result;
use async_trait::async_trait;
use docqa_embed::{
    EmbedConfig, EmbeddingBackend, EmbeddingMode, FallbackPolicy, HashEmbeddingProvider,
    ProviderChain, ProviderKind, RemoteEmbeddingProvider,
};
use docqa_retriever::{
    DeletionOptions, DocumentProcessor, RetrieverConfig, RetryPolicy, VectorStoreError,
    VectorStoreManager,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

fn quick_deletion() -> DeletionOptions {
    DeletionOptions {
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
        reclaim_pause: Duration::from_millis(1),
    }
}

fn write_corpus(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("wind.txt"),
        "Wind farms produced a record share of electricity.\n\nOffshore turbines are larger every year.",
    )?;
    std::fs::write(
        dir.join("solar.txt"),
        "Solar capacity doubled.\n\nRooftop panels now supply many homes.",
    )?;
    std::fs::write(dir.join("readme.md"), "ignored")?;
    Ok(())
}

/// Backend that counts calls and always fails.
struct UnreachableBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingBackend for UnreachableBackend {
    async fn embed_batch(&self, _texts: &[String]) -> docqa_embed::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(docqa_embed::EmbedError::invalid_response("remote", "unreachable"))
    }
}

#[tokio::test]
async fn test_local_only_pipeline_without_network() -> Result<()> {
    let temp = tempdir()?;
    let corpus = temp.path().join("docs");
    write_corpus(&corpus)?;

    let config = RetrieverConfig {
        persist_directory: temp.path().join("store"),
        chunk_size: 60,
        chunk_overlap: 10,
        embed: EmbedConfig::default(),
        ..RetrieverConfig::default()
    };
    let processor = DocumentProcessor::from_config(&config)?;
    let mut store = VectorStoreManager::from_config(&config)?.with_deletion_options(quick_deletion());
    assert_eq!(store.embedding_provider_name(), "local");
    assert_eq!(store.embedding_mode(), EmbeddingMode::HashAffinity);

    let chunks = processor.process(&corpus).await?;
    assert!(chunks.len() >= 4);
    store.create_collection(&chunks, &config.collection_name).await?;

    let first = &chunks[0].content;
    let results = store.similarity_search(first, 2).await?;
    assert_eq!(&results[0].content, first);
    assert!(results.len() <= 2);

    let report = store.delete_collection(&config.collection_name).await;
    assert!(report.success, "{report:?}");

    // The same path is immediately reusable
    store.create_collection(&chunks[..1], &config.collection_name).await?;
    let info = store.collection_info().await?.expect("collection exists");
    assert_eq!(info.record_count, 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_sticky_fallback_keeps_one_embedding_space() -> Result<()> {
    let temp = tempdir()?;
    let backend = Arc::new(UnreachableBackend {
        calls: AtomicUsize::new(0),
    });
    let remote = RemoteEmbeddingProvider::new("remote", backend.clone(), 16);
    let chain = ProviderChain::new(
        Arc::new(remote),
        Some(Arc::new(HashEmbeddingProvider::new(16))),
        FallbackPolicy::StickyAfter(1),
    );
    let mut store = VectorStoreManager::new(temp.path().join("store"), Arc::new(chain));

    let processor = DocumentProcessor::new(200, 20)?;
    let docs = processor.split(&[docqa_retriever::Document::new("Geothermal plants run steadily.")]);
    store.create_collection(&docs, "energy").await?;
    assert_eq!(store.embedding_mode(), EmbeddingMode::HashAffinity);

    let results = store.similarity_search("Geothermal plants run steadily.", 1).await?;
    assert_eq!(results[0].content, "Geothermal plants run steadily.");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_collection_records_the_provider_that_embedded_it() -> Result<()> {
    let temp = tempdir()?;
    let backend = Arc::new(UnreachableBackend {
        calls: AtomicUsize::new(0),
    });
    let chain = ProviderChain::new(
        Arc::new(RemoteEmbeddingProvider::new("remote", backend.clone(), 16)),
        Some(Arc::new(HashEmbeddingProvider::new(16))),
        FallbackPolicy::PerCall,
    );
    let mut store = VectorStoreManager::new(temp.path().join("store"), Arc::new(chain));

    let docs = vec![docqa_retriever::Document::new("Biomass boilers burn wood pellets.")];
    store.create_collection(&docs, "energy").await?;

    // Per-call fallback never sticks, so the chain still reports its primary
    assert_eq!(store.embedding_provider_name(), "remote");
    let info = store.collection_info().await?.expect("collection exists");
    assert_eq!(info.embedding_provider, "local");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_forced_remote_without_key_is_config_error() {
    let config = RetrieverConfig {
        embed: EmbedConfig::default().with_provider(ProviderKind::DashScope),
        ..RetrieverConfig::default()
    };

    match VectorStoreManager::from_config(&config) {
        Err(VectorStoreError::Embedding(e)) => assert!(e.is_config()),
        other => panic!("expected configuration error, got {other:?}"),
    }
}
