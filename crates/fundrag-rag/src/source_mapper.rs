use crate::citations::{classify_source, title_from_url};
use fundrag_core::{
    GrowwMappings, NamedSlug, QueryCategory, RetrievedResult, SourceCitation, SourcePriority,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const GROWW_FUND_PATH: &str = "groww.in/mutual-funds/";

/// Everything the mapper can learn from the question alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub category: QueryCategory,
    pub amc_slug: Option<String>,
    pub fund_slug: Option<String>,
    pub section_anchor: Option<String>,
}

/// Resolves a question to a first-party Groww page by string templating.
///
/// Pure: no I/O, no clock, no interior state. Identical inputs always give
/// identical output.
#[derive(Debug, Clone)]
pub struct SourcePageMapper {
    mappings: GrowwMappings,
}

impl Default for SourcePageMapper {
    fn default() -> Self {
        Self::new(GrowwMappings::default())
    }
}

impl SourcePageMapper {
    pub fn new(mappings: GrowwMappings) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &GrowwMappings {
        &self.mappings
    }

    pub fn map_to_page(&self, query: &str, retrieved: &[RetrievedResult]) -> Option<SourceCitation> {
        let analysis = self.analyze_query(query);
        self.resolve(&analysis, retrieved)
    }

    /// Query-only half of the mapping; safe to run before retrieval finishes.
    pub fn analyze_query(&self, query: &str) -> QueryAnalysis {
        let lower = query.to_lowercase();
        let category = self.identify_category(&lower);
        let section_anchor = if category == QueryCategory::FundDetails {
            self.identify_section(&lower)
        } else {
            None
        };
        QueryAnalysis {
            category,
            amc_slug: find_slug(&self.mappings.amc_mappings, &lower),
            fund_slug: find_slug(&self.mappings.fund_mappings, &lower),
            section_anchor,
        }
    }

    /// Combine the query analysis with what retrieval returned.
    ///
    /// A Groww page carried by a retrieved chunk wins over a templated one.
    pub fn resolve(
        &self,
        analysis: &QueryAnalysis,
        retrieved: &[RetrievedResult],
    ) -> Option<SourceCitation> {
        if let Some(url) = groww_url_from_chunks(retrieved) {
            debug!("Groww page carried by retrieved chunk: {}", url);
            return Some(self.citation(url));
        }

        let url = match analysis.category {
            QueryCategory::FundDetails => analysis
                .fund_slug
                .clone()
                .or_else(|| self.fund_slug_from_chunks(retrieved))
                .map(|slug| self.build_fund_url(&slug, analysis.section_anchor.as_deref())),
            QueryCategory::AmcOverview => self
                .amc_slug(analysis, retrieved)
                .map(|slug| self.build_amc_url(&slug)),
            QueryCategory::AmcFundsList => self
                .amc_slug(analysis, retrieved)
                .map(|slug| self.build_amc_funds_url(&slug)),
            QueryCategory::FundComparison => Some(self.build_comparison_url()),
            QueryCategory::GeneralInfo => None,
        };

        match url {
            Some(url) => {
                debug!("Mapped {} query to {}", analysis.category, url);
                Some(self.citation(url))
            }
            None => {
                debug!("No Groww page for {} query", analysis.category);
                None
            }
        }
    }

    pub fn build_fund_url(&self, fund_slug: &str, anchor: Option<&str>) -> String {
        let path = self
            .mappings
            .url_patterns
            .fund_details
            .replace("{fund_slug}", fund_slug);
        format!("{}{}", self.join(&path), anchor.unwrap_or_default())
    }

    pub fn build_amc_url(&self, amc_slug: &str) -> String {
        self.join(
            &self
                .mappings
                .url_patterns
                .amc_overview
                .replace("{amc_slug}", amc_slug),
        )
    }

    /// `hdfc-mutual-funds` lists under `best-hdfc-equity-mutual-funds`.
    pub fn build_amc_funds_url(&self, amc_slug: &str) -> String {
        let amc_name = amc_slug.split('-').next().unwrap_or(amc_slug);
        self.join(
            &self
                .mappings
                .url_patterns
                .amc_funds_list
                .replace("{amc_name}", amc_name),
        )
    }

    pub fn build_comparison_url(&self) -> String {
        self.join(&self.mappings.url_patterns.fund_comparison)
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.mappings.base_url.trim_end_matches('/'), path)
    }

    fn citation(&self, url: String) -> SourceCitation {
        let priority = match classify_source(&url) {
            SourcePriority::Unknown => SourcePriority::Groww,
            p => p,
        };
        SourceCitation {
            title: format!("Groww: {}", title_from_url(&url)),
            url,
            source_priority: priority,
        }
    }

    fn identify_category(&self, lower_query: &str) -> QueryCategory {
        self.mappings
            .query_patterns
            .iter()
            .find(|pattern| {
                pattern
                    .keywords
                    .iter()
                    .any(|k| contains_phrase(lower_query, &k.to_lowercase()))
            })
            .map(|pattern| pattern.category)
            .unwrap_or(QueryCategory::GeneralInfo)
    }

    fn identify_section(&self, lower_query: &str) -> Option<String> {
        self.mappings
            .page_sections
            .iter()
            .find(|section| {
                contains_phrase(lower_query, &section.section.replace('_', " ").to_lowercase())
                    || section
                        .keywords
                        .iter()
                        .any(|k| contains_phrase(lower_query, &k.to_lowercase()))
            })
            .map(|section| section.anchor.clone())
    }

    fn amc_slug(&self, analysis: &QueryAnalysis, retrieved: &[RetrievedResult]) -> Option<String> {
        analysis.amc_slug.clone().or_else(|| {
            retrieved
                .iter()
                .filter_map(|r| r.chunk.amc_name.as_deref())
                .find_map(|amc| find_slug(&self.mappings.amc_mappings, &amc.to_lowercase()))
        })
    }

    fn fund_slug_from_chunks(&self, retrieved: &[RetrievedResult]) -> Option<String> {
        retrieved
            .iter()
            .filter_map(|r| r.chunk.title.as_deref())
            .find_map(|title| find_slug(&self.mappings.fund_mappings, &title.to_lowercase()))
    }
}

/// First Groww URL attached to a retrieved chunk, in retrieval order.
fn groww_url_from_chunks(retrieved: &[RetrievedResult]) -> Option<String> {
    retrieved.iter().find_map(|r| {
        r.chunk
            .groww_page_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(String::from)
            .or_else(|| {
                let source = &r.chunk.source_url;
                source
                    .to_lowercase()
                    .contains(GROWW_FUND_PATH)
                    .then(|| source.clone())
            })
    })
}

fn find_slug(entries: &[NamedSlug], lower_text: &str) -> Option<String> {
    entries
        .iter()
        .find(|e| contains_phrase(lower_text, &e.name.to_lowercase()))
        .map(|e| e.slug.clone())
}

/// Whole-word phrase match, so "nav" does not fire on "navigate".
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    haystack.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
