#![allow(dead_code)]

use async_trait::async_trait;
use fundrag_ai::{
    GenerationConfig, LLMClient, LLMProvider, LLMResponse, LLMResult, Message, ProviderKind,
};
use fundrag_core::{
    Chunk, ChunkStore, FundRagConfig, GenerationError, GrowwMappings, IndexHit, MetadataFilter,
    NamedSlug, RetrievalError, VectorIndex,
};
use fundrag_rag::{RagPipeline, SourcePageMapper};
use fundrag_vector::{HashingEmbeddingProvider, Retriever};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DIM: usize = 16;
pub const HDFC_GROWW_URL: &str = "https://groww.in/mutual-funds/hdfc-equity-fund";
pub const HDFC_FUND_URL: &str =
    "https://www.hdfcfund.com/explore/mutual-funds/hdfc-equity-fund/direct";
pub const SEBI_TER_URL: &str = "https://www.sebi.gov.in/legal/circulars/ter.html";

pub fn chunk(id: &str, text: &str, source_url: &str, title: Option<&str>, amc: Option<&str>) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        text: text.to_string(),
        source_url: source_url.to_string(),
        amc_name: amc.map(String::from),
        content_type: Some("factsheet".to_string()),
        embedding_dim: DIM,
        title: title.map(String::from),
        groww_page_url: None,
    }
}

pub fn hdfc_chunks() -> Vec<(Chunk, f32)> {
    vec![
        (
            chunk(
                "hdfc-equity-ter",
                "The total expense ratio of HDFC Equity Fund (Direct Plan) is 1.5% as of the latest factsheet.",
                HDFC_FUND_URL,
                Some("HDFC Equity Fund - Direct Plan"),
                Some("HDFC"),
            ),
            0.82,
        ),
        (
            chunk(
                "sebi-ter-circular",
                "SEBI caps the total expense ratio of equity schemes based on assets under management.",
                SEBI_TER_URL,
                Some("SEBI circular on TER"),
                None,
            ),
            0.61,
        ),
    ]
}

/// Index and chunk store over a fixed hit list. Scores are returned as
/// given, whatever the query embedding.
pub struct ScriptedIndex {
    entries: Vec<(Chunk, f32)>,
    failures_left: AtomicU32,
    pub queries: AtomicU32,
}

impl ScriptedIndex {
    pub fn new(entries: Vec<(Chunk, f32)>) -> Self {
        Self {
            entries,
            failures_left: AtomicU32::new(0),
            queries: AtomicU32::new(0),
        }
    }

    /// First `n` queries fail with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn query(
        &self,
        _embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RetrievalError::Unavailable("connection refused".to_string()));
        }

        Ok(self
            .entries
            .iter()
            .filter(|(c, _)| filter.map_or(true, |f| f.matches(&c.metadata())))
            .take(top_k)
            .map(|(c, score)| IndexHit {
                chunk_id: c.chunk_id.clone(),
                similarity: *score,
                metadata: c.metadata(),
            })
            .collect())
    }

    fn embedding_model(&self) -> &str {
        "hashing-v1-16"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn corpus_version(&self) -> &str {
        "test-corpus-v1"
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl ChunkStore for ScriptedIndex {
    async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk, RetrievalError> {
        self.entries
            .iter()
            .find(|(c, _)| c.chunk_id == chunk_id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| RetrievalError::ChunkNotFound(chunk_id.to_string()))
    }
}

/// LLM that plays back queued outcomes, then repeats a default reply.
pub struct ScriptedLlm {
    queued: Mutex<VecDeque<LLMResult<String>>>,
    default_reply: String,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default_reply: reply.to_string(),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_fail(self, error: GenerationError) -> Self {
        self.queued.lock().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.queued.lock().pop_front();
        let content = match next {
            Some(outcome) => outcome?,
            None => self.default_reply.clone(),
        };
        Ok(LLMResponse {
            content,
            total_tokens: None,
            prompt_tokens: None,
            completion_tokens: None,
            finish_reason: Some("stop".to_string()),
            model: "scripted".to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}

pub fn test_config() -> FundRagConfig {
    let mut config = FundRagConfig::default();
    config.pipeline.backoff_base_ms = 1;
    config.llm.timeout_secs = 5;
    config
}

pub fn mappings() -> GrowwMappings {
    GrowwMappings {
        fund_mappings: vec![NamedSlug {
            name: "hdfc equity fund".to_string(),
            slug: "hdfc-equity-fund".to_string(),
        }],
        ..GrowwMappings::default()
    }
}

pub fn pipeline_with(
    config: &FundRagConfig,
    index: Arc<ScriptedIndex>,
    llm: Arc<ScriptedLlm>,
    llm_timeout: Duration,
) -> RagPipeline {
    let retriever = Retriever::new(
        Arc::new(HashingEmbeddingProvider::new(DIM)),
        index.clone(),
        index,
        Duration::from_secs(1),
    )
    .expect("embedder matches index");
    RagPipeline::new(
        config,
        retriever,
        SourcePageMapper::new(mappings()),
        LLMClient::new(llm, llm_timeout),
    )
}

pub fn pipeline(index: Arc<ScriptedIndex>, llm: Arc<ScriptedLlm>) -> RagPipeline {
    pipeline_with(&test_config(), index, llm, Duration::from_secs(5))
}
