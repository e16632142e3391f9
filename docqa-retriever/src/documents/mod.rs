//! Documents, format loaders and the load-and-split processor
//!
//! A [`Document`] is plain text plus a JSON metadata map. Loaders produce
//! documents from files; the [`DocumentProcessor`] picks a loader by
//! extension and splits the result into overlapping chunks, each of which is
//! again a `Document` carrying its parent's metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod loaders;
pub mod processor;

pub use loaders::{DocLoader, DocumentLoader, DocxLoader, PdfLoader, SUPPORTED_EXTENSIONS, TextLoader};
pub use processor::{DirectoryLoad, DocumentProcessor, SkippedFile};

/// A unit of text with free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` metadata entry, if the document came from a file.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}
