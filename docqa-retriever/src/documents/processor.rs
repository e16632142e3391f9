//! Loading files and directories and splitting them into chunks

use super::Document;
use super::loaders::{SUPPORTED_EXTENSIONS, loader_for};
use crate::config::RetrieverConfig;
use crate::error::DocumentProcessingError;
use docqa_context::RecursiveTextSplitter;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

type Result<T> = std::result::Result<T, DocumentProcessingError>;

/// A file that was found in a directory but could not be loaded.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for SkippedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Outcome of loading a directory: what loaded, and what was skipped and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryLoad {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Loads supported files and splits them into overlapping chunks.
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    splitter: RecursiveTextSplitter,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self {
            splitter: RecursiveTextSplitter::new(chunk_size, chunk_overlap)?,
        })
    }

    pub fn from_config(config: &RetrieverConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.splitter.chunk_size()
    }

    pub fn chunk_overlap(&self) -> usize {
        self.splitter.chunk_overlap()
    }

    /// Lowercase extension of `path` if a loader exists for it.
    pub fn supported_extension(path: &Path) -> Option<String> {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Load a single file with the loader for its extension.
    pub async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        if !exists(path).await? {
            return Err(DocumentProcessingError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let loader = loader_for(&extension).ok_or_else(|| {
            DocumentProcessingError::UnsupportedExtension {
                path: path.to_path_buf(),
                extension: extension.clone(),
            }
        })?;

        let documents = loader
            .load(path)
            .await
            .map_err(|e| DocumentProcessingError::loader(path, e))?;
        tracing::info!(path = %path.display(), documents = documents.len(), "Loaded file");
        Ok(documents)
    }

    /// Load every supported file directly inside `dir`, in file-name order.
    ///
    /// Unsupported files and subdirectories are ignored. A file whose loader
    /// fails is skipped and recorded; only a missing directory is an error.
    pub async fn load_directory_report(&self, dir: &Path) -> Result<DirectoryLoad> {
        let metadata = match tokio::fs::metadata(dir).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DocumentProcessingError::NotFound {
                    path: dir.to_path_buf(),
                });
            }
            Err(e) => return Err(DocumentProcessingError::io(dir, e)),
        };
        if !metadata.is_dir() {
            return Err(DocumentProcessingError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| DocumentProcessingError::io(dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocumentProcessingError::io(dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && Self::supported_extension(&path).is_some() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut report = DirectoryLoad::default();
        for path in files {
            match self.load(&path).await {
                Ok(documents) => report.documents.extend(documents),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            documents = report.documents.len(),
            skipped = report.skipped.len(),
            "Loaded directory"
        );
        Ok(report)
    }

    /// Load a mix of files and directories, in argument order.
    ///
    /// Failures inside a directory are skipped and recorded as in
    /// [`Self::load_directory_report`]; a named file that cannot be loaded
    /// fails the whole call.
    pub async fn load_paths(&self, paths: &[PathBuf]) -> Result<DirectoryLoad> {
        let mut load = DirectoryLoad::default();
        for path in paths {
            let is_dir = tokio::fs::metadata(path)
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            if is_dir {
                let report = self.load_directory_report(path).await?;
                load.documents.extend(report.documents);
                load.skipped.extend(report.skipped);
            } else {
                load.documents.extend(self.load(path).await?);
            }
        }
        Ok(load)
    }

    pub async fn load_directory(&self, dir: &Path) -> Result<Vec<Document>> {
        Ok(self.load_directory_report(dir).await?.documents)
    }

    /// Split documents into chunks; documents already within the chunk size pass through unchanged.
    pub fn split(&self, documents: &[Document]) -> Vec<Document> {
        let chunk_size = self.splitter.chunk_size();
        let mut chunks = Vec::new();

        for document in documents {
            if document.content.chars().count() <= chunk_size {
                chunks.push(document.clone());
                continue;
            }
            for chunk in self.splitter.split_text(&document.content) {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".into(), chunk.sequence.into());
                metadata.insert("start_index".into(), chunk.start_index.into());
                chunks.push(Document {
                    content: chunk.chunk_text,
                    metadata,
                });
            }
        }

        tracing::debug!(documents = documents.len(), chunks = chunks.len(), "Split documents");
        chunks
    }

    /// Load a file or directory and split the result.
    pub async fn process(&self, path: &Path) -> Result<Vec<Document>> {
        let is_dir = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.is_dir(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DocumentProcessingError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(DocumentProcessingError::io(path, e)),
        };

        let documents = if is_dir {
            self.load_directory(path).await?
        } else {
            self.load(path).await?
        };
        Ok(self.split(&documents))
    }
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| DocumentProcessingError::io(path, e))
}
