use fundrag_core::{ChunkStore, MetadataFilter, RetrievalError, RetrievedResult, VectorIndex};
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::providers::{same_embedding_model, EmbeddingProvider};

/// Trim and collapse runs of whitespace.
pub fn preprocess_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Embeds the query, asks the index for nearest neighbours and keeps the
/// ones at or above the similarity floor.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ChunkStore>,
    query_timeout: Duration,
}

impl Retriever {
    /// Fails if the embedder does not match the model the index was built with.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
        query_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let retriever = Self {
            embedder,
            index,
            store,
            query_timeout,
        };
        retriever.check_compatibility()?;
        Ok(retriever)
    }

    pub fn check_compatibility(&self) -> Result<(), RetrievalError> {
        if !same_embedding_model(self.index.embedding_model(), self.embedder.model_id()) {
            return Err(RetrievalError::EmbeddingModelMismatch {
                expected: self.index.embedding_model().to_string(),
                actual: self.embedder.model_id().to_string(),
            });
        }
        if self.index.dimension() != self.embedder.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        Ok(())
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Results sorted by descending similarity; an empty list means nothing
    /// relevant was found and is not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<RetrievedResult>, RetrievalError> {
        self.retrieve_filtered(query, top_k, min_similarity, None)
            .await
    }

    pub async fn retrieve_by_amc(
        &self,
        query: &str,
        amc_name: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<RetrievedResult>, RetrievalError> {
        let filter = MetadataFilter::by_amc(amc_name);
        self.retrieve_filtered(query, top_k, min_similarity, Some(&filter))
            .await
    }

    #[instrument(skip(self, filter))]
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedResult>, RetrievalError> {
        let start = Instant::now();
        let query = preprocess_query(query);
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        self.check_compatibility()?;

        let embedding = timeout(self.query_timeout, self.embedder.embed(&query))
            .await
            .map_err(|_| RetrievalError::Timeout(self.query_timeout))??;
        if embedding.len() != self.index.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: embedding.len(),
            });
        }

        let filter = filter.filter(|f| !f.is_empty());
        let mut hits = timeout(
            self.query_timeout,
            self.index.query(&embedding, top_k, filter),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.query_timeout))??;

        let returned = hits.len();
        hits.retain(|hit| !hit.similarity.is_nan() && hit.similarity >= min_similarity);
        // Stable, so ties keep the index's native order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(top_k);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_chunk(&hit.chunk_id).await {
                Ok(chunk) if chunk.source_url.trim().is_empty() => {
                    warn!("Skipping chunk {} without source_url", chunk.chunk_id);
                }
                Ok(chunk) => results.push(RetrievedResult {
                    chunk,
                    similarity_score: hit.similarity,
                }),
                Err(RetrievalError::ChunkNotFound(id)) => {
                    warn!("Index returned chunk {} missing from the chunk store", id);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Retrieved {}/{} chunks above {:.2} in {}ms",
            results.len(),
            returned,
            min_similarity,
            start.elapsed().as_millis()
        );

        Ok(results)
    }

    /// Run several phrasings of a question and merge the results, keeping the
    /// best score per chunk. Fails only if every phrasing fails.
    pub async fn retrieve_multi_query(
        &self,
        queries: &[String],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<RetrievedResult>, RetrievalError> {
        let outcomes = join_all(
            queries
                .iter()
                .map(|q| self.retrieve(q, top_k, min_similarity)),
        )
        .await;

        let mut first_error = None;
        let mut succeeded = false;
        let mut order: Vec<String> = Vec::new();
        let mut best: HashMap<String, RetrievedResult> = HashMap::new();

        for outcome in outcomes {
            match outcome {
                Ok(results) => {
                    succeeded = true;
                    for result in results {
                        let id = result.chunk.chunk_id.clone();
                        match best.get_mut(&id) {
                            Some(existing) => {
                                if result.similarity_score > existing.similarity_score {
                                    *existing = result;
                                }
                            }
                            None => {
                                order.push(id.clone());
                                best.insert(id, result);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Multi-query retrieval branch failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if !succeeded {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let mut merged: Vec<RetrievedResult> =
            order.into_iter().filter_map(|id| best.remove(&id)).collect();
        merged.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(Ordering::Equal)
        });
        merged.truncate(top_k);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing_embedding_provider::HashingEmbeddingProvider;
    use crate::index::InMemoryVectorIndex;
    use async_trait::async_trait;
    use fundrag_core::{Chunk, IndexHit};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn chunk(id: &str, text: &str, url: &str, amc: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source_url: url.to_string(),
            amc_name: Some(amc.to_string()),
            content_type: Some("scheme_info".to_string()),
            embedding_dim: 128,
            title: None,
            groww_page_url: None,
        }
    }

    fn build(texts: &[(&str, &str, &str, &str)]) -> (Arc<HashingEmbeddingProvider>, Arc<InMemoryVectorIndex>) {
        let embedder = Arc::new(HashingEmbeddingProvider::new(128));
        let mut index = InMemoryVectorIndex::new(embedder.model_id(), 128, "v1");
        for (id, text, url, amc) in texts {
            index
                .insert(chunk(id, text, url, amc), embedder.embed_sync(text))
                .unwrap();
        }
        (embedder, Arc::new(index))
    }

    fn retriever(
        embedder: Arc<HashingEmbeddingProvider>,
        index: Arc<InMemoryVectorIndex>,
    ) -> Retriever {
        Retriever::new(embedder, index.clone(), index, Duration::from_secs(1)).unwrap()
    }

    fn corpus() -> Vec<(&'static str, &'static str, &'static str, &'static str)> {
        vec![
            (
                "hdfc-er",
                "HDFC Equity Fund expense ratio is 1.5%",
                "https://www.hdfcfund.com/equity",
                "HDFC",
            ),
            (
                "sbi-exit",
                "SBI Bluechip Fund exit load is 1% if redeemed within 1 year",
                "https://www.sbimf.com/bluechip",
                "SBI",
            ),
            (
                "sebi-risk",
                "SEBI riskometer categories range from low to very high",
                "https://www.sebi.gov.in/riskometer",
                "SEBI",
            ),
        ]
    }

    #[test]
    fn test_preprocess_query() {
        assert_eq!(preprocess_query("  what   is\tNAV \n"), "what is NAV");
        assert_eq!(preprocess_query("   "), "");
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);

        let results = retriever
            .retrieve("HDFC Equity Fund expense ratio", 3, 0.0)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.chunk_id, "hdfc-er");
        assert!(results
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score));
    }

    #[tokio::test]
    async fn test_threshold_can_empty_results() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);

        let results = retriever
            .retrieve("completely unrelated weather forecast", 3, 0.99)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_lower_threshold_never_returns_fewer() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);
        let query = "exit load of SBI Bluechip";

        let strict = retriever.retrieve(query, 3, 0.6).await.unwrap();
        let loose = retriever.retrieve(query, 3, 0.1).await.unwrap();
        let wider = retriever.retrieve(query, 5, 0.1).await.unwrap();
        assert!(loose.len() >= strict.len());
        assert!(wider.len() >= loose.len());
    }

    #[tokio::test]
    async fn test_larger_top_k_never_returns_fewer() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);
        let query = "HDFC Equity Fund expense ratio";

        let mut previous: Vec<String> = Vec::new();
        for top_k in 1..=5 {
            let results = retriever.retrieve(query, top_k, 0.0).await.unwrap();
            let ids: Vec<String> = results.iter().map(|r| r.chunk.chunk_id.clone()).collect();
            assert!(ids.len() >= previous.len(), "top_k {} returned fewer", top_k);
            assert!(ids.len() <= top_k);
            assert_eq!(&ids[..previous.len()], &previous[..]);
            previous = ids;
        }
    }

    #[tokio::test]
    async fn test_filter_by_amc() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);

        let results = retriever
            .retrieve_by_amc("fund details", "SBI", 3, -1.0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "sbi-exit");
    }

    #[tokio::test]
    async fn test_model_mismatch_fails_fast() {
        let (_, index) = build(&corpus());
        let other = Arc::new(HashingEmbeddingProvider::new(64));
        let result = Retriever::new(other, index.clone(), index, Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(RetrievalError::EmbeddingModelMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_multi_query_dedupes_by_chunk() {
        let (embedder, index) = build(&corpus());
        let retriever = retriever(embedder, index);

        let queries = vec![
            "HDFC Equity Fund expense ratio".to_string(),
            "expense ratio HDFC".to_string(),
        ];
        let merged = retriever
            .retrieve_multi_query(&queries, 5, 0.0)
            .await
            .unwrap();
        let hdfc_hits = merged
            .iter()
            .filter(|r| r.chunk.chunk_id == "hdfc-er")
            .count();
        assert_eq!(hdfc_hits, 1);
    }

    struct SlowIndex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for SlowIndex {
        async fn query(
            &self,
            _embedding: &[f32],
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<IndexHit>, RetrievalError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
        fn embedding_model(&self) -> &str {
            "hashing-v1-128"
        }
        fn dimension(&self) -> usize {
            128
        }
        fn corpus_version(&self) -> &str {
            "v1"
        }
        async fn len(&self) -> usize {
            0
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![0.0; 128])
        }
        fn model_id(&self) -> &str {
            "hashing-v1-128"
        }
        fn dimension(&self) -> usize {
            128
        }
        fn provider_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_embedding_timeout_is_transient_error() {
        let (_, index) = build(&corpus());
        let retriever = Retriever::new(
            Arc::new(SlowEmbedder),
            index.clone(),
            index,
            Duration::from_millis(20),
        )
        .unwrap();

        let err = retriever.retrieve("nav", 3, 0.5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_index_timeout_is_transient_error() {
        let (embedder, store) = build(&corpus());
        let slow = Arc::new(SlowIndex {
            calls: AtomicUsize::new(0),
        });
        let retriever =
            Retriever::new(embedder, slow.clone(), store, Duration::from_millis(20)).unwrap();

        let err = retriever.retrieve("nav", 3, 0.5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout(_)));
        assert!(err.is_transient());
        assert_eq!(slow.calls.load(AtomicOrdering::SeqCst), 1);
    }
}
