//! Persisted index backend and similarity scoring
//!
//! Collections live in one SQLite file per persist directory. Each record keeps
//! its text, its metadata as JSON, and its embedding as an `f16` blob. Search
//! is a scan with cosine similarity, so scores are in `[-1, 1]` and a higher
//! score means a closer match.

use half::f16;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod collection_index;

pub use collection_index::{CollectionIndex, INDEX_FILE_NAME};

/// Database ID of a record.
pub type RecordId = i64;

/// One embedded chunk as stored in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: Option<RecordId>,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f16>,
}

/// Summary of a collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub embedding_provider: String,
    pub record_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Cosine similarity of two vectors; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, norm_a, norm_b), (x, y)| {
            let (x, y) = (x.to_f32(), y.to_f32());
            (dot + x * y, norm_a + x * x, norm_b + y * y)
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Score every record against `query` and keep the best `k`, best first.
///
/// Ties keep storage order, so repeated searches return the same sequence.
pub fn rank(records: Vec<StoredRecord>, query: &[f16], k: usize) -> Vec<(StoredRecord, f32)> {
    let mut scored: Vec<(StoredRecord, f32)> = records
        .into_iter()
        .map(|record| {
            let score = cosine_similarity(query, &record.embedding);
            (record, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
