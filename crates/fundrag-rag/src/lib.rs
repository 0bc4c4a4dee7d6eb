pub mod assembler;
pub mod cache;
pub mod citations;
pub mod pipeline;
pub mod retry;
pub mod source_mapper;

pub use assembler::{
    rank_citations, FallbackReason, ResponseAssembler, FALLBACK_TEMPLATE, GROWW_FALLBACK_TEMPLATE,
};
pub use cache::{normalize_query, AnswerCache};
pub use citations::{
    citation_for, classify_source, resolve_markers, title_from_url, url_key, CitationFormatter,
    CitationStyle,
};
pub use pipeline::{HealthReport, PipelineStage, RagPipeline, StageTrace};
pub use retry::RetryPolicy;
pub use source_mapper::{QueryAnalysis, SourcePageMapper};
