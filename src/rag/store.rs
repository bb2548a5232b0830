use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::similarity::cosine_similarity;
use crate::error::LLMError;

/// A chunk of text and its embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique within a store; generated on save when empty
    pub id: String,
    /// Source chunk, empty for query-only records
    pub text: String,
    /// Embedding produced by an external model
    pub embedding: Vec<f64>,
    /// Cosine similarity against the last query. Only set on query results.
    #[serde(default)]
    pub score: f64,
}

impl VectorRecord {
    /// Record for a chunk whose id will be generated on save.
    pub fn new(text: impl Into<String>, embedding: Vec<f64>) -> Self {
        Self {
            text: text.into(),
            embedding,
            ..Default::default()
        }
    }

    /// Query-only record: no text, no id.
    pub fn query(embedding: Vec<f64>) -> Self {
        Self {
            embedding,
            ..Default::default()
        }
    }
}

/// Storage of embedding records with similarity search.
pub trait VectorStore {
    /// Inserts or overwrites `record`, generating an id when it has none.
    fn save(&mut self, record: VectorRecord) -> Result<VectorRecord, LLMError>;

    /// Every stored record.
    fn get_all(&self) -> Vec<VectorRecord>;

    /// Records whose similarity with `query` is at least `min_score`, with
    /// `score` filled in.
    fn search_similarities(&self, query: &VectorRecord, min_score: f64) -> Vec<VectorRecord>;

    /// The `max_results` best records scoring at least `min_score`, best first.
    ///
    /// A high `min_score` can return fewer than `max_results` records.
    fn search_top_n_similarities(
        &self,
        query: &VectorRecord,
        min_score: f64,
        max_results: usize,
    ) -> Vec<VectorRecord> {
        let mut records = self.search_similarities(query, min_score);
        // stable: equal scores keep the search order
        records.sort_by(|a, b| b.score.total_cmp(&a.score));
        records.truncate(max_results);
        records
    }
}

/// In-memory vector store.
///
/// Records are kept in first-insertion order, which makes search results and
/// tie-breaks deterministic. There is no internal locking; wrap the store in
/// a [`SharedVectorStore`] to use it from several tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorStore {
    records: Vec<VectorRecord>,
    index: HashMap<String, usize>,
}

/// A store shared between tasks.
pub type SharedVectorStore = Arc<RwLock<MemoryVectorStore>>;

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the store for shared use.
    pub fn shared(self) -> SharedVectorStore {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks a record up by id.
    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }
}

fn generate_id() -> Result<String, LLMError> {
    let id = Uuid::new_v4();
    if id.is_nil() {
        return Err(LLMError::IdentifierError(
            "random source produced a nil UUID".to_string(),
        ));
    }
    Ok(id.to_string())
}

impl VectorStore for MemoryVectorStore {
    fn save(&mut self, mut record: VectorRecord) -> Result<VectorRecord, LLMError> {
        if record.id.is_empty() {
            record.id = generate_id()?;
        }
        record.score = 0.0;
        match self.index.get(&record.id) {
            Some(&pos) => self.records[pos] = record.clone(),
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record.clone());
            }
        }
        Ok(record)
    }

    fn get_all(&self) -> Vec<VectorRecord> {
        self.records.clone()
    }

    fn search_similarities(&self, query: &VectorRecord, min_score: f64) -> Vec<VectorRecord> {
        self.records
            .iter()
            .filter_map(|record| {
                let score = cosine_similarity(&query.embedding, &record.embedding);
                (score >= min_score).then(|| VectorRecord {
                    score,
                    ..record.clone()
                })
            })
            .collect()
    }
}
