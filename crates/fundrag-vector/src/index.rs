use async_trait::async_trait;
use fundrag_core::{
    Chunk, ChunkStore, FundRagError, IndexHit, MetadataFilter, Result, RetrievalError, VectorIndex,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// On-disk form of the index, as exported by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub embedding_model: String,
    pub dimension: usize,
    #[serde(default = "default_corpus_version")]
    pub corpus_version: String,
    pub records: Vec<IndexRecord>,
}

fn default_corpus_version() -> String {
    "unversioned".to_string()
}

/// Brute-force cosine index that also serves as the chunk store.
///
/// Records keep insertion order, and query results with equal similarity
/// come back in that order.
pub struct InMemoryVectorIndex {
    embedding_model: String,
    dimension: usize,
    corpus_version: String,
    records: Vec<IndexRecord>,
    by_id: HashMap<String, usize>,
}

impl InMemoryVectorIndex {
    pub fn new(
        embedding_model: impl Into<String>,
        dimension: usize,
        corpus_version: impl Into<String>,
    ) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            corpus_version: corpus_version.into(),
            records: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Add a chunk. Re-inserting an existing `chunk_id` replaces it in place.
    pub fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> Result<()> {
        if chunk.source_url.trim().is_empty() {
            return Err(FundRagError::InvalidSnapshot(format!(
                "chunk {} has no source_url",
                chunk.chunk_id
            )));
        }
        if embedding.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            }
            .into());
        }

        let record = IndexRecord { chunk, embedding };
        match self.by_id.get(&record.chunk.chunk_id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.by_id
                    .insert(record.chunk.chunk_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
        Ok(())
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        let mut index = Self::new(
            snapshot.embedding_model,
            snapshot.dimension,
            snapshot.corpus_version,
        );
        for record in snapshot.records {
            index.insert(record.chunk, record.embedding)?;
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: IndexSnapshot = serde_json::from_str(&content)?;
        let index = Self::from_snapshot(snapshot)?;
        info!(
            "Loaded index {} ({} chunks, model {}, corpus {})",
            path.display(),
            index.records.len(),
            index.embedding_model,
            index.corpus_version
        );
        Ok(index)
    }

    pub fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            corpus_version: self.corpus_version.clone(),
            records: self.records.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&self.to_snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> std::result::Result<Vec<IndexHit>, RetrievalError> {
        if embedding.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(&IndexRecord, f32)> = self
            .records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.chunk.metadata())))
            .map(|r| (r, cosine_similarity(embedding, &r.embedding)))
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        debug!("Index query returned {} hits", scored.len());

        Ok(scored
            .into_iter()
            .map(|(record, similarity)| IndexHit {
                chunk_id: record.chunk.chunk_id.clone(),
                similarity,
                metadata: record.chunk.metadata(),
            })
            .collect())
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn corpus_version(&self) -> &str {
        &self.corpus_version
    }

    async fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl ChunkStore for InMemoryVectorIndex {
    async fn get_chunk(&self, chunk_id: &str) -> std::result::Result<Chunk, RetrievalError> {
        self.by_id
            .get(chunk_id)
            .map(|&position| self.records[position].chunk.clone())
            .ok_or_else(|| RetrievalError::ChunkNotFound(chunk_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, amc: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: format!("text for {}", id),
            source_url: format!("https://example.com/{}", id),
            amc_name: Some(amc.to_string()),
            content_type: Some("scheme_info".to_string()),
            embedding_dim: 3,
            title: None,
            groww_page_url: None,
        }
    }

    fn sample_index() -> InMemoryVectorIndex {
        let mut index = InMemoryVectorIndex::new("test-model", 3, "v1");
        index.insert(chunk("a", "HDFC"), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(chunk("b", "SBI"), vec![0.0, 1.0, 0.0]).unwrap();
        index.insert(chunk("c", "HDFC"), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(chunk("d", "Axis"), vec![0.7, 0.7, 0.0]).unwrap();
        index
    }

    #[test]
    fn test_cosine_similarity_edges() {
        approx::assert_abs_diff_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        approx::assert_abs_diff_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity_with_stable_ties() {
        let index = sample_index();
        let hits = index.query(&[1.0, 0.0, 0.0], 4, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "b"]);
    }

    #[tokio::test]
    async fn test_query_with_filter_and_top_k() {
        let index = sample_index();
        let filter = MetadataFilter::by_amc("hdfc");
        let hits = index.query(&[0.0, 1.0, 0.0], 1, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.amc_name.as_deref(), Some("HDFC"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = sample_index();
        let err = index.query(&[1.0, 0.0], 3, None).await.unwrap_err();
        assert_eq!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_insert_rejects_missing_source_url() {
        let mut index = InMemoryVectorIndex::new("test-model", 3, "v1");
        let mut bad = chunk("x", "HDFC");
        bad.source_url = "  ".to_string();
        assert!(index.insert(bad, vec![1.0, 0.0, 0.0]).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_file() {
        let index = sample_index();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        index.save(&path).unwrap();

        let loaded = InMemoryVectorIndex::load(&path).unwrap();
        assert_eq!(loaded.chunk_count(), 4);
        assert_eq!(loaded.corpus_version(), "v1");
        let chunk = loaded.get_chunk("d").await.unwrap();
        assert_eq!(chunk.amc_name.as_deref(), Some("Axis"));
        assert!(matches!(
            loaded.get_chunk("missing").await,
            Err(RetrievalError::ChunkNotFound(_))
        ));
    }
}
