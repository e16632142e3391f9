//! Retrieval-augmented question answering over a vector store
//!
//! A [`RagChain`] moves through three states:
//!
//! ```text
//! Uninitialized --setup_qa_chain--> Configured (LLM ready, no collection)
//!       |                                |
//!       +--------setup_qa_chain----------+--> Ready (LLM + retriever bound to k)
//! ```
//!
//! Only a `Ready` chain answers questions. Retrieval happens once per answer
//! and the same documents are both fed to the model and returned as sources.

use crate::error::{RagError, Result};
use crate::llm::{ChatModel, EnvLlmFactory, LlmFactory, LlmOverrides};
use crate::prompt::PromptTemplate;
use docqa_retriever::config::DEFAULT_RETRIEVAL_K;
use docqa_retriever::{CollectionSearcher, Document, VectorStoreManager};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A vector store shared between a service and the chains it creates.
pub type SharedStore = Arc<RwLock<VectorStoreManager>>;

/// Separator placed between retrieved chunks in the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Uninitialized,
    Configured,
    Ready,
}

/// Settings for [`RagChain::setup_qa_chain`].
#[derive(Debug, Clone)]
pub struct QaOptions {
    pub llm: LlmOverrides,
    pub k: usize,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            llm: LlmOverrides::default(),
            k: DEFAULT_RETRIEVAL_K,
        }
    }
}

impl QaOptions {
    pub fn with_k(self, k: usize) -> Self {
        Self { k, ..self }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QaAnswer {
    pub answer: String,
    pub source_documents: Vec<Document>,
}

/// A search handle fixed to `k` results.
#[derive(Debug, Clone)]
pub struct Retriever {
    searcher: CollectionSearcher,
    k: usize,
}

impl Retriever {
    pub fn new(searcher: CollectionSearcher, k: usize) -> Self {
        Self { searcher, k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn collection_name(&self) -> &str {
        self.searcher.collection_name()
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        Ok(self.searcher.similarity_search(query, self.k).await?)
    }
}

pub struct RagChain {
    store: SharedStore,
    factory: Arc<dyn LlmFactory>,
    prompt: PromptTemplate,
    llm: Option<Arc<dyn ChatModel>>,
    retriever: Option<Retriever>,
    state: ChainState,
}

impl std::fmt::Debug for RagChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagChain")
            .field("state", &self.state)
            .field("llm", &self.llm.as_ref().map(|llm| llm.model_name().to_string()))
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl RagChain {
    /// Chain over `store` whose models come from the process environment.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            factory: Arc::new(EnvLlmFactory),
            prompt: PromptTemplate::default(),
            llm: None,
            retriever: None,
            state: ChainState::Uninitialized,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn LlmFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn retriever(&self) -> Option<&Retriever> {
        self.retriever.as_ref()
    }

    /// Acquire a model and bind a retriever returning `options.k` documents.
    ///
    /// Fails if `k` is zero, if the model cannot be created, or if the store
    /// has no active collection. In the last case the chain is left
    /// `Configured` with the model kept.
    pub async fn setup_qa_chain(&mut self, options: &QaOptions) -> Result<()> {
        if options.k == 0 {
            return Err(RagError::chain("k must be at least 1"));
        }

        let llm = self.factory.create(&options.llm)?;
        tracing::info!(
            provider = llm.provider_name(),
            model = llm.model_name(),
            k = options.k,
            "Setting up QA chain"
        );
        self.llm = Some(llm);
        self.retriever = None;

        let searcher = {
            let store = self.store.read().await;
            if !store.has_active_collection() {
                self.state = ChainState::Configured;
                return Err(RagError::chain(
                    "no active collection; create or load a vector store first",
                ));
            }
            store.searcher()?
        };

        self.retriever = Some(Retriever::new(searcher, options.k));
        self.state = ChainState::Ready;
        Ok(())
    }

    /// Retrieve context for `question`, ask the model, and return both.
    pub async fn answer_question(&self, question: &str) -> Result<QaAnswer> {
        let (ChainState::Ready, Some(llm), Some(retriever)) =
            (self.state, &self.llm, &self.retriever)
        else {
            return Err(RagError::chain(
                "QA chain is not set up; call setup_qa_chain first",
            ));
        };

        let source_documents = retriever.retrieve(question).await?;
        let context = source_documents
            .iter()
            .map(|doc| doc.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let prompt = self.prompt.render(&context, question);

        tracing::debug!(
            sources = source_documents.len(),
            prompt_chars = prompt.len(),
            "Answering question"
        );
        let answer = llm.chat(&prompt).await?;

        Ok(QaAnswer {
            answer,
            source_documents,
        })
    }

    /// Documents relevant to `query` without generating an answer.
    ///
    /// A bound retriever is used as configured; otherwise the store's active
    /// collection is searched for `k` results.
    pub async fn get_relevant_documents(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        if let Some(retriever) = &self.retriever {
            return retriever.retrieve(query).await;
        }

        let searcher = {
            let store = self.store.read().await;
            if !store.has_active_collection() {
                return Err(RagError::chain(
                    "no retriever or vector store available; load a collection first",
                ));
            }
            store.searcher()?
        };
        Ok(searcher.similarity_search(query, k).await?)
    }
}
