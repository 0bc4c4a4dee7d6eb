use crate::assembler::{FallbackReason, ResponseAssembler};
use crate::cache::{normalize_query, AnswerCache};
use crate::retry::RetryPolicy;
use crate::source_mapper::SourcePageMapper;
use anyhow::{anyhow, Context};
use fundrag_ai::{Guardrails, LLMClient, LLMProviderFactory, PromptBuilder};
use fundrag_core::config_manager::{FundRagConfig, RetrievalConfig};
use fundrag_core::{AnswerResult, GrowwMappings, RetrievedResult, ValidationError};
use fundrag_vector::{create_embedding_provider, InMemoryVectorIndex, Retriever};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Per-query states. FAILED marks a stage that gave up; the orchestrator
/// then moves on to ASSEMBLING with empty results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Received,
    Retrieving,
    Mapping,
    Prompting,
    Generating,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "RECEIVED",
            PipelineStage::Retrieving => "RETRIEVING",
            PipelineStage::Mapping => "MAPPING",
            PipelineStage::Prompting => "PROMPTING",
            PipelineStage::Generating => "GENERATING",
            PipelineStage::Assembling => "ASSEMBLING",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What happened while answering one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTrace {
    pub transitions: Vec<PipelineStage>,
    /// Stage that failed and the error it failed with
    pub failures: Vec<(PipelineStage, String)>,
    pub retrieval_attempts: u32,
    pub generation_attempts: u32,
    pub cache_hit: bool,
}

impl StageTrace {
    fn enter(&mut self, stage: PipelineStage) {
        debug!("Pipeline stage -> {}", stage);
        self.transitions.push(stage);
    }

    fn fail(&mut self, stage: PipelineStage, error: impl fmt::Display) {
        let message = error.to_string();
        warn!("{} failed, degrading to fallback: {}", stage, message);
        self.transitions.push(PipelineStage::Failed);
        self.failures.push((stage, message));
    }

    pub fn visited(&self, stage: PipelineStage) -> bool {
        self.transitions.contains(&stage)
    }

    pub fn final_stage(&self) -> Option<PipelineStage> {
        self.transitions.last().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub index_chunks: usize,
    pub embedding_model: String,
    pub corpus_version: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_available: bool,
    pub cache_entries: Option<usize>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.index_chunks > 0 && self.llm_available
    }
}

/// The query-time entry point.
///
/// Holds no per-query state: concurrent `answer_query` calls share only
/// read-only collaborators and, when enabled, the answer cache.
pub struct RagPipeline {
    retriever: Arc<Retriever>,
    mapper: SourcePageMapper,
    prompt_builder: PromptBuilder,
    llm: LLMClient,
    assembler: ResponseAssembler,
    guardrails: Guardrails,
    retrieval: RetrievalConfig,
    temperature: f32,
    max_tokens: usize,
    retrieval_retry: RetryPolicy,
    generation_retry: RetryPolicy,
    cache: Option<AnswerCache>,
}

impl RagPipeline {
    pub fn new(
        config: &FundRagConfig,
        retriever: Retriever,
        mapper: SourcePageMapper,
        llm: LLMClient,
    ) -> Self {
        let backoff = Duration::from_millis(config.pipeline.backoff_base_ms);
        let cache = config
            .pipeline
            .cache_enabled
            .then(|| AnswerCache::new(config.pipeline.cache_capacity));

        Self {
            retriever: Arc::new(retriever),
            mapper,
            prompt_builder: PromptBuilder::new(config.prompt.clone()),
            llm,
            assembler: ResponseAssembler::new(config.answer.clone()),
            guardrails: Guardrails::new(),
            retrieval: config.retrieval.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            retrieval_retry: RetryPolicy::new(config.pipeline.retrieval_attempts, backoff),
            generation_retry: RetryPolicy::new(config.pipeline.generation_attempts, backoff),
            cache,
        }
    }

    /// Wire every collaborator from configuration: index snapshot, embedder,
    /// Groww mappings and the LLM provider.
    pub fn from_config(config: &FundRagConfig) -> anyhow::Result<Self> {
        let index_path = config.retrieval.index_path.as_ref().ok_or_else(|| {
            anyhow!("No index configured. Set retrieval.index_path or FUNDRAG_INDEX_PATH")
        })?;
        let index = Arc::new(
            InMemoryVectorIndex::load(index_path)
                .with_context(|| format!("Failed to load index {}", index_path.display()))?,
        );

        let embedder = create_embedding_provider(&config.embedding)?;
        let retriever = Retriever::new(
            embedder,
            index.clone(),
            index,
            Duration::from_millis(config.retrieval.timeout_ms),
        )?;

        let mappings = match &config.groww.mapping_path {
            Some(path) => GrowwMappings::from_path(path)?,
            None => GrowwMappings::default(),
        };

        let provider = LLMProviderFactory::create_from_config(&config.llm)?;
        let llm = LLMClient::new(provider, Duration::from_secs(config.llm.timeout_secs));

        Ok(Self::new(config, retriever, SourcePageMapper::new(mappings), llm))
    }

    pub fn mapper(&self) -> &SourcePageMapper {
        &self.mapper
    }

    /// Answer a question. Only malformed input is an error; every other
    /// failure comes back as a fallback answer.
    pub async fn answer_query(&self, query: &str) -> Result<AnswerResult, ValidationError> {
        self.answer_query_traced(query).await.map(|(answer, _)| answer)
    }

    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn answer_query_traced(
        &self,
        query: &str,
    ) -> Result<(AnswerResult, StageTrace), ValidationError> {
        let query = self.validate(query)?;
        let start = Instant::now();

        if let Err(violation) = self.guardrails.check_query(&query) {
            info!("Refusing advice-seeking query: '{}'", violation.matched);
            let mut trace = StageTrace::default();
            trace.enter(PipelineStage::Received);
            trace.enter(PipelineStage::Assembling);
            trace.enter(PipelineStage::Done);
            let mut answer = self.assembler.refusal(&query);
            answer.latency_ms = start.elapsed().as_millis() as u64;
            return Ok((answer, trace));
        }

        let (mut answer, trace) = match &self.cache {
            Some(cache) => {
                let key = AnswerCache::fingerprint(
                    &normalize_query(&query),
                    self.retriever.index().corpus_version(),
                );
                let mut computed_trace = None;
                let slot = &mut computed_trace;
                let query_ref = query.as_str();
                let (answer, hit) = cache
                    .get_or_compute(&key, || async move {
                        let (answer, trace, cacheable) = self.run(query_ref).await;
                        *slot = Some(trace);
                        (answer, cacheable)
                    })
                    .await;
                let trace = match computed_trace {
                    Some(trace) => trace,
                    None => {
                        let mut trace = StageTrace::default();
                        trace.enter(PipelineStage::Received);
                        trace.enter(PipelineStage::Done);
                        trace.cache_hit = hit;
                        trace
                    }
                };
                (answer, trace)
            }
            None => {
                let (answer, trace, _) = self.run(&query).await;
                (answer, trace)
            }
        };

        if trace.cache_hit {
            answer.query_id = uuid::Uuid::new_v4();
            answer.answered_at = chrono::Utc::now();
        }
        answer.latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Answered in {}ms: sufficient={}, fallback={}, level={:?}, citations={}, confidence={:.2}",
            answer.latency_ms,
            answer.has_sufficient_info,
            answer.fallback_used,
            answer.fallback_level,
            answer.citations.len(),
            answer.confidence
        );
        Ok((answer, trace))
    }

    fn validate(&self, query: &str) -> Result<String, ValidationError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        let len = trimmed.chars().count();
        if len > self.retrieval.max_query_length {
            return Err(ValidationError::TooLong {
                len,
                max: self.retrieval.max_query_length,
            });
        }
        Ok(trimmed.to_string())
    }

    /// The state machine proper. The bool is false when the answer was
    /// shaped by an infrastructure failure and must not be cached.
    async fn run(&self, query: &str) -> (AnswerResult, StageTrace, bool) {
        let mut trace = StageTrace::default();
        let mut infra_failure = false;
        trace.enter(PipelineStage::Received);

        trace.enter(PipelineStage::Retrieving);
        trace.enter(PipelineStage::Mapping);
        let (retrieval, analysis) = tokio::join!(self.retrieve(query), async {
            self.mapper.analyze_query(query)
        });

        let (retrieved, attempts) = retrieval;
        trace.retrieval_attempts = attempts;
        let retrieved: Vec<RetrievedResult> = match retrieved {
            Ok(chunks) => chunks,
            Err(e) => {
                infra_failure = true;
                trace.fail(PipelineStage::Retrieving, e);
                Vec::new()
            }
        };
        let mapped = self.mapper.resolve(&analysis, &retrieved);

        let answer = if !self.assembler.has_sufficient_info(&retrieved) {
            trace.enter(PipelineStage::Assembling);
            let reason = if retrieved.is_empty() {
                FallbackReason::NoChunks
            } else {
                FallbackReason::LowConfidence
            };
            self.assembler
                .fallback(query, &retrieved, mapped.as_ref(), reason)
        } else {
            trace.enter(PipelineStage::Prompting);
            let prompt = self.prompt_builder.build(query, &retrieved);

            trace.enter(PipelineStage::Generating);
            let mut attempts = 0;
            let generated = self
                .generation_retry
                .run(
                    "LLM generation",
                    |e: &fundrag_core::GenerationError| e.is_retryable(),
                    |attempt| {
                        attempts = attempt;
                        self.llm.generate(&prompt, self.temperature, self.max_tokens)
                    },
                )
                .await;
            trace.generation_attempts = attempts;

            match generated {
                Ok(text) => {
                    trace.enter(PipelineStage::Assembling);
                    self.assembler
                        .assemble(query, &text, &retrieved, mapped.as_ref(), &prompt.sources)
                }
                Err(e) => {
                    infra_failure = true;
                    trace.fail(PipelineStage::Generating, e);
                    trace.enter(PipelineStage::Assembling);
                    self.assembler.fallback(
                        query,
                        &retrieved,
                        mapped.as_ref(),
                        FallbackReason::GenerationFailed,
                    )
                }
            }
        };

        trace.enter(PipelineStage::Done);
        (answer, trace, !infra_failure)
    }

    async fn retrieve(
        &self,
        query: &str,
    ) -> (Result<Vec<RetrievedResult>, fundrag_core::RetrievalError>, u32) {
        let mut attempts = 0;
        let result = self
            .retrieval_retry
            .run(
                "Retrieval",
                |e: &fundrag_core::RetrievalError| e.is_transient(),
                |attempt| {
                    attempts = attempt;
                    self.retriever.retrieve(
                        query,
                        self.retrieval.top_k,
                        self.retrieval.min_similarity,
                    )
                },
            )
            .await;
        (result, attempts)
    }

    pub async fn health_check(&self) -> HealthReport {
        let index = self.retriever.index();
        let provider = self.llm.provider();
        HealthReport {
            index_chunks: index.len().await,
            embedding_model: index.embedding_model().to_string(),
            corpus_version: index.corpus_version().to_string(),
            llm_provider: provider.provider_name().to_string(),
            llm_model: provider.model_name().to_string(),
            llm_available: self.llm.is_available().await,
            cache_entries: self.cache.as_ref().map(|c| c.len()),
        }
    }
}
