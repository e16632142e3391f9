//! Format-specific loaders for text, PDF and Word documents

use super::Document;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::io::{Cursor, Read};
use std::path::Path;

/// File extensions (lowercase, without the dot) that have a loader.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "doc", "docx"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Vec<Document>>;
}

/// Pick the loader for a lowercase extension.
pub fn loader_for(extension: &str) -> Option<Box<dyn DocumentLoader>> {
    match extension {
        "txt" => Some(Box::new(TextLoader)),
        "pdf" => Some(Box::new(PdfLoader)),
        "docx" => Some(Box::new(DocxLoader)),
        "doc" => Some(Box::new(DocLoader)),
        _ => None,
    }
}

fn base_metadata(path: &Path) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source".into(), path.display().to_string().into());
    if let Some(name) = path.file_name() {
        metadata.insert("file_name".into(), name.to_string_lossy().into_owned().into());
    }
    metadata
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// Plain UTF-8 text. Invalid bytes are replaced rather than rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = read_file(path).await?;
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
        let mut metadata = base_metadata(path);

        let content = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    valid_up_to = e.valid_up_to(),
                    "File is not valid UTF-8, decoding lossily"
                );
                metadata.insert("lossy_decoding".into(), true.into());
                String::from_utf8_lossy(bytes).into_owned()
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Document { content, metadata }])
    }
}

/// PDF text extraction, one document per page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = read_file(path).await?;
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
                .map_err(|e| anyhow!("PDF text extraction failed: {e}"))
        })
        .await??;

        let metadata = base_metadata(path);
        let documents: Vec<Document> = pages
            .into_iter()
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(page, content)| {
                let mut metadata = metadata.clone();
                metadata.insert("page".into(), page.into());
                Document { content, metadata }
            })
            .collect();

        tracing::debug!(path = %path.display(), pages = documents.len(), "Loaded PDF");
        Ok(documents)
    }
}

/// Office Open XML word processing documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxLoader;

impl DocxLoader {
    fn extract(bytes: Vec<u8>) -> Result<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("opening DOCX archive")?;
        let mut entry = archive
            .by_name("word/document.xml")
            .context("DOCX archive has no word/document.xml")?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .context("reading word/document.xml")?;
        document_xml_to_text(&xml)
    }
}

#[async_trait]
impl DocumentLoader for DocxLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = read_file(path).await?;
        let content = tokio::task::spawn_blocking(move || Self::extract(bytes)).await??;

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Document {
            content,
            metadata: base_metadata(path),
        }])
    }
}

/// `.doc` files. Only OOXML payloads are readable; legacy OLE binaries are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocLoader;

#[async_trait]
impl DocumentLoader for DocLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = read_file(path).await?;
        if bytes.starts_with(ZIP_MAGIC) {
            tracing::debug!(path = %path.display(), "Reading .doc file as OOXML");
            return DocxLoader.load(path).await;
        }
        if bytes.starts_with(OLE_MAGIC) {
            bail!("legacy binary Word format (OLE2) is not supported; save the file as .docx");
        }
        bail!("unrecognised .doc content (neither OOXML nor OLE2)");
    }
}

/// Flatten WordprocessingML into text: paragraphs become lines, tabs and
/// breaks are kept, entities are decoded.
pub(crate) fn document_xml_to_text(xml: &str) -> Result<String> {
    let tab = Regex::new(r"<w:tab\b[^>]*/>")?;
    let line_break = Regex::new(r"<w:(?:br|cr)\b[^>]*/>")?;
    let paragraph_end = Regex::new(r"</w:p>")?;
    let any_tag = Regex::new(r"<[^>]*>")?;
    let entity = Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);")?;

    let text = tab.replace_all(xml, "\t");
    let text = line_break.replace_all(&text, "\n");
    let text = paragraph_end.replace_all(&text, "\n");
    let text = any_tag.replace_all(&text, "");
    let text = entity.replace_all(&text, |caps: &Captures| decode_entity(&caps[1]));

    Ok(text.trim_end().to_string())
}

fn decode_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        numeric => {
            let code = match numeric.strip_prefix("#x") {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => numeric.trim_start_matches('#').parse().ok(),
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{numeric};"))
        }
    }
}
