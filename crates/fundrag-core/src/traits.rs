use crate::{Chunk, IndexHit, MetadataFilter, RetrievalError};
use async_trait::async_trait;

/// Nearest-neighbour service built by the ingestion pipeline.
///
/// Hits come back in the index's native order; callers must not assume
/// anything about the order of equal scores beyond it being stable.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>, RetrievalError>;

    /// Embedding model the index was built with.
    fn embedding_model(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Identifier of the ingested corpus snapshot.
    fn corpus_version(&self) -> &str;

    async fn len(&self) -> usize;
}

/// Read-only chunk lookup.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk, RetrievalError>;
}
