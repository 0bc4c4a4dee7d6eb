use crate::citations::{citation_for, resolve_markers, url_key};
use chrono::Utc;
use fundrag_ai::{Guardrails, PromptSource, REFUSAL_TEMPLATE};
use fundrag_core::config_manager::AnswerConfig;
use fundrag_core::{AnswerResult, FallbackLevel, RetrievedResult, SourceCitation};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shown whenever there is no trustworthy generated answer.
pub const FALLBACK_TEMPLATE: &str = "I don't have specific information about this in my knowledge base. \
I can only answer factual questions about mutual fund schemes using verified sources from official \
AMC, SEBI, and AMFI websites. Please try rephrasing your question or ask about specific fund details \
like expense ratio, exit load, minimum SIP, or lock-in period.";

/// Fallback variant used when a Groww page is known for the question.
pub const GROWW_FALLBACK_TEMPLATE: &str = "I don't have specific information about this in my \
knowledge base. You can find the details for this scheme on Groww: {groww_url}. For official \
figures, refer to the scheme documents on the AMC, SEBI or AMFI websites.";

/// Why an answer degraded to the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NoChunks,
    LowConfidence,
    GenerationFailed,
    GuardrailBlocked,
}

/// Merges generated text with citations and decides on the fallback.
pub struct ResponseAssembler {
    config: AnswerConfig,
    guardrails: Guardrails,
}

impl ResponseAssembler {
    pub fn new(config: AnswerConfig) -> Self {
        Self {
            config,
            guardrails: Guardrails::new(),
        }
    }

    /// Deterministic confidence from retrieval alone.
    ///
    /// `max_similarity + corroboration_bonus * min(n - 1, max_corroboration)`,
    /// clamped to `[0, 1]`. Every retrieved chunk has already passed the
    /// similarity threshold, so each extra chunk counts as corroboration.
    pub fn confidence(&self, retrieved: &[RetrievedResult]) -> f32 {
        let Some(max_similarity) = retrieved
            .iter()
            .map(|r| r.similarity_score)
            .filter(|s| !s.is_nan())
            .reduce(f32::max)
        else {
            return 0.0;
        };
        let corroborating = retrieved.len().saturating_sub(1).min(self.config.max_corroboration);
        (max_similarity + self.config.corroboration_bonus * corroborating as f32).clamp(0.0, 1.0)
    }

    pub fn has_sufficient_info(&self, retrieved: &[RetrievedResult]) -> bool {
        !retrieved.is_empty() && self.confidence(retrieved) >= self.config.min_confidence
    }

    /// Turn generated text into an answer.
    ///
    /// `sources` is the numbering the model saw in its prompt. Markers are
    /// rewritten to positions in the ranked citation list; when none resolve,
    /// the top chunk's position is appended.
    pub fn assemble(
        &self,
        query: &str,
        llm_text: &str,
        retrieved: &[RetrievedResult],
        mapped_source: Option<&SourceCitation>,
        sources: &[PromptSource],
    ) -> AnswerResult {
        let confidence = self.confidence(retrieved);
        if retrieved.is_empty() {
            return self.fallback(query, retrieved, mapped_source, FallbackReason::NoChunks);
        }
        if confidence < self.config.min_confidence {
            return self.fallback(query, retrieved, mapped_source, FallbackReason::LowConfidence);
        }

        let violations = self.guardrails.check_response(llm_text);
        if let Some(first) = violations.first() {
            warn!(
                "Discarding generated answer: {} guardrail violation(s), first '{}' ({})",
                violations.len(),
                first.matched,
                first.kind
            );
            return self.fallback(query, retrieved, mapped_source, FallbackReason::GuardrailBlocked);
        }

        let citations = rank_citations(retrieved, mapped_source);
        let position_of_url = |url: &str| {
            let key = url_key(url);
            citations
                .iter()
                .position(|c| url_key(&c.url) == key)
                .map(|i| i + 1)
        };
        let position_of_source = |number: usize| {
            sources
                .iter()
                .find(|s| s.number == number)
                .and_then(|s| position_of_url(&s.source_url))
        };

        let cleaned = llm_text.replace("```", "");
        let (mut answer_text, resolved) = resolve_markers(cleaned.trim(), position_of_source);
        if resolved == 0 {
            let top_url = sources
                .iter()
                .min_by_key(|s| s.number)
                .map(|s| s.source_url.as_str())
                .or_else(|| top_result(retrieved).map(|r| r.chunk.source_url.as_str()));
            if let Some(position) = top_url.and_then(|url| position_of_url(url)) {
                debug!("Model cited no known source; appending top source [{}]", position);
                answer_text = format!("{} [{}]", answer_text, position);
            }
        }

        let level = fallback_level(&citations, mapped_source);

        new_result(
            query,
            answer_text,
            citations,
            confidence,
            true,
            false,
            level,
            retrieved.len(),
            false,
        )
    }

    /// Fixed-template answer. Routes to Groww when a page is mapped.
    pub fn fallback(
        &self,
        query: &str,
        retrieved: &[RetrievedResult],
        mapped_source: Option<&SourceCitation>,
        reason: FallbackReason,
    ) -> AnswerResult {
        debug!("Assembling fallback answer: {:?}", reason);
        let groww = mapped_source.filter(|c| c.source_priority.is_groww());
        let (answer_text, citations, level) = match groww {
            Some(citation) => (
                GROWW_FALLBACK_TEMPLATE.replace("{groww_url}", &citation.url),
                vec![citation.clone()],
                FallbackLevel::Groww,
            ),
            None => (FALLBACK_TEMPLATE.to_string(), Vec::new(), FallbackLevel::Generic),
        };

        new_result(
            query,
            answer_text,
            citations,
            self.confidence(retrieved),
            false,
            true,
            level,
            retrieved.len(),
            reason == FallbackReason::GuardrailBlocked,
        )
    }

    /// Answer for advice-seeking questions. No retrieval, no citations.
    pub fn refusal(&self, query: &str) -> AnswerResult {
        new_result(
            query,
            REFUSAL_TEMPLATE.to_string(),
            Vec::new(),
            0.0,
            false,
            true,
            FallbackLevel::Generic,
            0,
            true,
        )
    }
}

/// GROWW first, then descending similarity; one entry per URL.
pub fn rank_citations(
    retrieved: &[RetrievedResult],
    mapped_source: Option<&SourceCitation>,
) -> Vec<SourceCitation> {
    let mut scored: Vec<(SourceCitation, f32)> = Vec::with_capacity(retrieved.len() + 1);
    if let Some(mapped) = mapped_source {
        scored.push((mapped.clone(), f32::INFINITY));
    }
    for result in retrieved {
        let chunk = &result.chunk;
        if chunk.source_url.trim().is_empty() {
            continue;
        }
        scored.push((
            citation_for(&chunk.source_url, chunk.title.as_deref()),
            result.similarity_score,
        ));
    }

    scored.sort_by(|(a, sa), (b, sb)| {
        b.source_priority
            .is_groww()
            .cmp(&a.source_priority.is_groww())
            .then_with(|| sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut seen = HashSet::new();
    scored
        .into_iter()
        .filter(|(c, _)| seen.insert(url_key(&c.url)))
        .map(|(c, _)| c)
        .collect()
}

fn top_result(retrieved: &[RetrievedResult]) -> Option<&RetrievedResult> {
    retrieved.iter().reduce(|best, r| {
        if r.similarity_score > best.similarity_score {
            r
        } else {
            best
        }
    })
}

fn fallback_level(citations: &[SourceCitation], mapped_source: Option<&SourceCitation>) -> FallbackLevel {
    if mapped_source.map_or(false, |c| c.source_priority.is_groww()) {
        FallbackLevel::Groww
    } else if citations.iter().any(|c| !c.source_priority.is_groww()) {
        FallbackLevel::External
    } else if !citations.is_empty() {
        FallbackLevel::GrowwSourcesOnly
    } else {
        FallbackLevel::Generic
    }
}

#[allow(clippy::too_many_arguments)]
fn new_result(
    query: &str,
    answer_text: String,
    citations: Vec<SourceCitation>,
    confidence: f32,
    has_sufficient_info: bool,
    fallback_used: bool,
    fallback_level: FallbackLevel,
    chunks_retrieved: usize,
    guardrail_blocked: bool,
) -> AnswerResult {
    AnswerResult {
        query_id: Uuid::new_v4(),
        query: query.to_string(),
        answer_text,
        citations,
        confidence,
        has_sufficient_info,
        fallback_used,
        fallback_level,
        chunks_retrieved,
        guardrail_blocked,
        latency_ms: 0,
        answered_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fundrag_core::{Chunk, SourcePriority};

    fn result(url: &str, score: f32) -> RetrievedResult {
        RetrievedResult {
            chunk: Chunk {
                chunk_id: format!("{}-{}", url, score),
                text: "The expense ratio is 1.5%.".to_string(),
                source_url: url.to_string(),
                amc_name: Some("HDFC".to_string()),
                content_type: None,
                embedding_dim: 8,
                title: None,
                groww_page_url: None,
            },
            similarity_score: score,
        }
    }

    /// Prompt numbering for `retrieved` in descending similarity.
    fn sources(retrieved: &[RetrievedResult]) -> Vec<PromptSource> {
        let mut ranked: Vec<&RetrievedResult> = retrieved.iter().collect();
        ranked.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap());
        ranked
            .iter()
            .enumerate()
            .map(|(i, r)| PromptSource {
                number: i + 1,
                chunk_id: r.chunk.chunk_id.clone(),
                source_url: r.chunk.source_url.clone(),
                similarity: r.similarity_score,
            })
            .collect()
    }

    fn groww() -> SourceCitation {
        citation_for("https://groww.in/mutual-funds/hdfc-equity-fund", Some("Groww: HDFC Equity Fund"))
    }

    fn assembler() -> ResponseAssembler {
        ResponseAssembler::new(AnswerConfig::default())
    }

    #[test]
    fn test_confidence_formula() {
        let a = assembler();
        assert_eq!(a.confidence(&[]), 0.0);
        assert_relative_eq!(a.confidence(&[result("https://a.com/x", 0.7)]), 0.7);
        let three = [
            result("https://a.com/x", 0.7),
            result("https://a.com/y", 0.6),
            result("https://a.com/z", 0.55),
        ];
        assert_relative_eq!(a.confidence(&three), 0.8, epsilon = 1e-6);
        let many: Vec<_> = (0..10).map(|i| result(&format!("https://a.com/{}", i), 0.98)).collect();
        assert_relative_eq!(a.confidence(&many), 1.0);
    }

    #[test]
    fn test_groww_first_then_similarity_and_dedup() {
        let retrieved = [
            result("https://www.hdfcfund.com/low", 0.55),
            result("https://www.hdfcfund.com/high", 0.9),
            result("https://www.hdfcfund.com/high/", 0.85),
            result("https://www.sebi.gov.in/circular", 0.7),
        ];
        let citations = rank_citations(&retrieved, Some(&groww()));
        let urls: Vec<&str> = citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://groww.in/mutual-funds/hdfc-equity-fund",
                "https://www.hdfcfund.com/high",
                "https://www.sebi.gov.in/circular",
                "https://www.hdfcfund.com/low",
            ]
        );
        assert_eq!(citations[2].source_priority, SourcePriority::Sebi);
    }

    #[test]
    fn test_assemble_sufficient_answer() {
        let retrieved = [result("https://www.hdfcfund.com/factsheet", 0.82)];
        let answer = assembler().assemble(
            "What is the expense ratio of HDFC Equity Fund?",
            "The expense ratio of HDFC Equity Fund is 1.5% [Source 1].",
            &retrieved,
            Some(&groww()),
            &sources(&retrieved),
        );
        assert!(answer.has_sufficient_info);
        assert!(!answer.fallback_used);
        assert_eq!(answer.fallback_level, FallbackLevel::Groww);
        assert_eq!(answer.citations[0].url, "https://groww.in/mutual-funds/hdfc-equity-fund");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.answer_text, "The expense ratio of HDFC Equity Fund is 1.5% [2].");
        assert_eq!(answer.citations[1].url, "https://www.hdfcfund.com/factsheet");
    }

    #[test]
    fn test_markers_follow_ranked_citations() {
        let retrieved = [
            result("https://www.hdfcfund.com/factsheet", 0.9),
            result("https://www.sebi.gov.in/circular", 0.7),
            result("https://www.hdfcfund.com/factsheet/", 0.6),
        ];
        let answer = assembler().assemble(
            "q",
            "TER is 1.5% [Source 1]. SEBI caps TER [Source 2]. Also [Source 3] [Source 9].",
            &retrieved,
            Some(&groww()),
            &sources(&retrieved),
        );
        let urls: Vec<&str> = answer.citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://groww.in/mutual-funds/hdfc-equity-fund",
                "https://www.hdfcfund.com/factsheet",
                "https://www.sebi.gov.in/circular",
            ]
        );
        assert_eq!(
            answer.answer_text,
            "TER is 1.5% [2]. SEBI caps TER [3]. Also [2]."
        );
    }

    #[test]
    fn test_missing_citation_gets_top_source() {
        let retrieved = [result("https://www.hdfcfund.com/factsheet", 0.82)];
        let answer = assembler().assemble("q", "Exit load is 1%.", &retrieved, None, &sources(&retrieved));
        assert_eq!(answer.answer_text, "Exit load is 1%. [1]");
        assert_eq!(answer.fallback_level, FallbackLevel::External);
        assert_eq!(answer.citations.len(), 1);
    }

    #[test]
    fn test_dangling_citation_gets_top_source_behind_groww() {
        let retrieved = [
            result("https://www.sebi.gov.in/circular", 0.6),
            result("https://www.hdfcfund.com/factsheet", 0.82),
        ];
        let answer = assembler().assemble(
            "q",
            "Exit load is 1% [Source 7].",
            &retrieved,
            Some(&groww()),
            &sources(&retrieved),
        );
        assert_eq!(answer.answer_text, "Exit load is 1%. [2]");
        assert_eq!(answer.citations[1].url, "https://www.hdfcfund.com/factsheet");
    }

    #[test]
    fn test_no_chunks_gives_fixed_template() {
        let answer = assembler().assemble("q", "Some guess.", &[], None, &[]);
        assert!(!answer.has_sufficient_info);
        assert!(answer.fallback_used);
        assert_eq!(answer.answer_text, FALLBACK_TEMPLATE);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.fallback_level, FallbackLevel::Generic);
    }

    #[test]
    fn test_low_confidence_routes_to_groww() {
        let config = AnswerConfig {
            min_confidence: 0.95,
            ..Default::default()
        };
        let retrieved = [result("https://www.hdfcfund.com/factsheet", 0.6)];
        let answer = ResponseAssembler::new(config).assemble(
            "q",
            "text [1]",
            &retrieved,
            Some(&groww()),
            &sources(&retrieved),
        );
        assert!(!answer.has_sufficient_info);
        assert!(answer.answer_text.contains("https://groww.in/mutual-funds/hdfc-equity-fund"));
        assert_eq!(answer.citations, vec![groww()]);
        assert_eq!(answer.fallback_level, FallbackLevel::Groww);
    }

    #[test]
    fn test_advice_is_discarded_entirely() {
        let retrieved = [result("https://www.hdfcfund.com/factsheet", 0.9)];
        let answer = assembler().assemble(
            "q",
            "The expense ratio is 1.5% [Source 1]. I recommend this fund, it is the best fund.",
            &retrieved,
            None,
            &sources(&retrieved),
        );
        assert!(answer.guardrail_blocked);
        assert!(answer.fallback_used);
        assert_eq!(answer.answer_text, FALLBACK_TEMPLATE);
        assert!(!answer.answer_text.contains("1.5%"));
    }

    #[test]
    fn test_refusal() {
        let answer = assembler().refusal("Should I buy HDFC Equity Fund?");
        assert_eq!(answer.answer_text, REFUSAL_TEMPLATE);
        assert!(answer.fallback_used && !answer.has_sufficient_info);
        assert!(answer.citations.is_empty());
    }
}
