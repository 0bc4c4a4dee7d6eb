use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An immutable unit of ingested content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    /// Page the text was scraped from. Never empty.
    pub source_url: String,
    #[serde(default)]
    pub amc_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub embedding_dim: usize,
    #[serde(default)]
    pub title: Option<String>,
    /// Groww page pre-linked to this chunk during ingestion, if any.
    #[serde(default)]
    pub groww_page_url: Option<String>,
}

impl Chunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            source_url: self.source_url.clone(),
            amc_name: self.amc_name.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

/// Metadata returned alongside a nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_url: String,
    pub amc_name: Option<String>,
    pub content_type: Option<String>,
}

/// Raw hit from a `VectorIndex` query, in the index's native order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub chunk_id: String,
    pub similarity: f32,
    pub metadata: ChunkMetadata,
}

/// Equality filter on chunk metadata. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub amc_name: Option<String>,
    pub content_type: Option<String>,
}

impl MetadataFilter {
    pub fn by_amc(amc_name: impl Into<String>) -> Self {
        Self {
            amc_name: Some(amc_name.into()),
            content_type: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amc_name.is_none() && self.content_type.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let field_matches = |wanted: &Option<String>, actual: &Option<String>| match wanted {
            None => true,
            Some(w) => actual
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case(w))
                .unwrap_or(false),
        };
        field_matches(&self.amc_name, &metadata.amc_name)
            && field_matches(&self.content_type, &metadata.content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedResult {
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1].
    pub similarity_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourcePriority {
    Groww,
    Amc,
    Sebi,
    Amfi,
    Unknown,
}

impl SourcePriority {
    pub fn is_groww(&self) -> bool {
        matches!(self, SourcePriority::Groww)
    }
}

impl fmt::Display for SourcePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePriority::Groww => write!(f, "GROWW"),
            SourcePriority::Amc => write!(f, "AMC"),
            SourcePriority::Sebi => write!(f, "SEBI"),
            SourcePriority::Amfi => write!(f, "AMFI"),
            SourcePriority::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub url: String,
    pub title: String,
    pub source_priority: SourcePriority,
}

/// Which tier of the source preference ladder the answer ended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    /// A first-party Groww page was resolved.
    Groww,
    /// At least one official AMC/SEBI/AMFI page backs the answer.
    External,
    /// Only Groww-hosted chunks were cited and no page mapping resolved.
    GrowwSourcesOnly,
    /// Nothing usable; generic template.
    Generic,
}

/// The pipeline's output for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub query_id: Uuid,
    pub query: String,
    pub answer_text: String,
    pub citations: Vec<SourceCitation>,
    pub confidence: f32,
    pub has_sufficient_info: bool,
    pub fallback_used: bool,
    pub fallback_level: FallbackLevel,
    pub chunks_retrieved: usize,
    pub guardrail_blocked: bool,
    pub latency_ms: u64,
    pub answered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(amc: Option<&str>, content_type: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            source_url: "https://www.hdfcfund.com/x".into(),
            amc_name: amc.map(String::from),
            content_type: content_type.map(String::from),
        }
    }

    #[test]
    fn test_filter_matching() {
        let filter = MetadataFilter::by_amc("HDFC");
        assert!(filter.matches(&metadata(Some("hdfc"), None)));
        assert!(!filter.matches(&metadata(Some("SBI"), None)));
        assert!(!filter.matches(&metadata(None, None)));
        assert!(MetadataFilter::default().matches(&metadata(None, None)));
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&SourcePriority::Groww).unwrap();
        assert_eq!(json, "\"GROWW\"");
        assert_eq!(SourcePriority::Sebi.to_string(), "SEBI");
    }
}
