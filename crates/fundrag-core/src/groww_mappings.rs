use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::config_manager::ConfigError;

/// Kind of Groww page a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    FundDetails,
    AmcOverview,
    AmcFundsList,
    FundComparison,
    GeneralInfo,
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryCategory::FundDetails => "fund_details",
            QueryCategory::AmcOverview => "amc_overview",
            QueryCategory::AmcFundsList => "amc_funds_list",
            QueryCategory::FundComparison => "fund_comparison",
            QueryCategory::GeneralInfo => "general_info",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPattern {
    pub category: QueryCategory,
    pub keywords: Vec<String>,
}

/// A name variant as it may appear in a question, and its Groww URL slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSlug {
    pub name: String,
    pub slug: String,
}

impl NamedSlug {
    fn new(name: &str, slug: &str) -> Self {
        Self {
            name: name.to_string(),
            slug: slug.to_string(),
        }
    }
}

/// URL path templates, joined onto `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPatterns {
    #[serde(default = "default_fund_details_pattern")]
    pub fund_details: String,
    #[serde(default = "default_amc_overview_pattern")]
    pub amc_overview: String,
    #[serde(default = "default_amc_funds_list_pattern")]
    pub amc_funds_list: String,
    #[serde(default = "default_fund_comparison_pattern")]
    pub fund_comparison: String,
}

impl Default for UrlPatterns {
    fn default() -> Self {
        Self {
            fund_details: default_fund_details_pattern(),
            amc_overview: default_amc_overview_pattern(),
            amc_funds_list: default_amc_funds_list_pattern(),
            fund_comparison: default_fund_comparison_pattern(),
        }
    }
}

/// In-page anchor for a fund detail section such as the expense ratio table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSection {
    pub section: String,
    pub anchor: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Static Groww page-mapping tables, loaded once at process start.
///
/// Lists are ordered: the first matching category, AMC or fund wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowwMappings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_query_patterns")]
    pub query_patterns: Vec<CategoryPattern>,
    #[serde(default = "default_amc_mappings")]
    pub amc_mappings: Vec<NamedSlug>,
    #[serde(default)]
    pub fund_mappings: Vec<NamedSlug>,
    #[serde(default)]
    pub url_patterns: UrlPatterns,
    #[serde(default)]
    pub page_sections: Vec<PageSection>,
}

impl Default for GrowwMappings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            query_patterns: default_query_patterns(),
            amc_mappings: default_amc_mappings(),
            fund_mappings: Vec::new(),
            url_patterns: UrlPatterns::default(),
            page_sections: Vec::new(),
        }
    }
}

impl GrowwMappings {
    /// Load mappings from a JSON, YAML or TOML file, chosen by extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json")
            .to_lowercase();

        let mappings: GrowwMappings = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
            "toml" => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            _ => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        };

        mappings.validate()?;

        info!(
            "Loaded Groww mappings from {}: {} AMCs, {} funds, {} categories",
            path.display(),
            mappings.amc_mappings.len(),
            mappings.fund_mappings.len(),
            mappings.query_patterns.len()
        );

        Ok(mappings)
    }

    /// Reject tables that could only ever produce broken URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::ValidationError(format!(
                "Groww base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }

        let templates = [
            ("fund_details", &self.url_patterns.fund_details, Some("{fund_slug}")),
            ("amc_overview", &self.url_patterns.amc_overview, Some("{amc_slug}")),
            ("amc_funds_list", &self.url_patterns.amc_funds_list, Some("{amc_name}")),
            ("fund_comparison", &self.url_patterns.fund_comparison, None),
        ];
        for (name, template, placeholder) in templates {
            if !template.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "URL pattern '{}' must start with '/': {}",
                    name, template
                )));
            }
            if let Some(placeholder) = placeholder {
                if !template.contains(placeholder) {
                    return Err(ConfigError::ValidationError(format!(
                        "URL pattern '{}' is missing placeholder {}",
                        name, placeholder
                    )));
                }
            }
        }

        for entry in self.amc_mappings.iter().chain(self.fund_mappings.iter()) {
            if entry.name.trim().is_empty() || entry.slug.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Mapping entries need a name and a slug: {:?}",
                    entry
                )));
            }
        }

        for section in &self.page_sections {
            if !section.anchor.starts_with('#') {
                return Err(ConfigError::ValidationError(format!(
                    "Section anchor for '{}' must start with '#'",
                    section.section
                )));
            }
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    "https://groww.in".to_string()
}
fn default_fund_details_pattern() -> String {
    "/mutual-funds/{fund_slug}".to_string()
}
fn default_amc_overview_pattern() -> String {
    "/mutual-funds/amc/{amc_slug}".to_string()
}
fn default_amc_funds_list_pattern() -> String {
    "/mutual-funds/top/best-{amc_name}-equity-mutual-funds".to_string()
}
fn default_fund_comparison_pattern() -> String {
    "/mutual-funds/compare".to_string()
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn default_query_patterns() -> Vec<CategoryPattern> {
    vec![
        CategoryPattern {
            category: QueryCategory::FundComparison,
            keywords: keywords(&["compare", "comparison", "versus", "vs", "difference between"]),
        },
        CategoryPattern {
            category: QueryCategory::AmcFundsList,
            keywords: keywords(&[
                "funds by",
                "funds from",
                "funds offered",
                "list of funds",
                "all funds",
                "schemes offered",
                "schemes by",
            ]),
        },
        CategoryPattern {
            category: QueryCategory::AmcOverview,
            keywords: keywords(&[
                "about the amc",
                "amc overview",
                "fund house",
                "asset management company",
                "total aum of",
            ]),
        },
        CategoryPattern {
            category: QueryCategory::FundDetails,
            keywords: keywords(&[
                "expense ratio",
                "exit load",
                "minimum sip",
                "min sip",
                "sip amount",
                "lock-in",
                "lock in",
                "nav",
                "aum",
                "fund manager",
                "benchmark",
                "riskometer",
                "lumpsum",
                "investment objective",
            ]),
        },
    ]
}

fn default_amc_mappings() -> Vec<NamedSlug> {
    vec![
        NamedSlug::new("hdfc", "hdfc-mutual-funds"),
        NamedSlug::new("icici prudential", "icici-prudential-mutual-funds"),
        NamedSlug::new("icici", "icici-prudential-mutual-funds"),
        NamedSlug::new("sbi", "sbi-mutual-funds"),
        NamedSlug::new("axis", "axis-mutual-funds"),
        NamedSlug::new("kotak", "kotak-mahindra-mutual-funds"),
        NamedSlug::new("nippon india", "nippon-india-mutual-funds"),
        NamedSlug::new("aditya birla sun life", "aditya-birla-sun-life-mutual-funds"),
        NamedSlug::new("aditya birla", "aditya-birla-sun-life-mutual-funds"),
        NamedSlug::new("uti", "uti-mutual-funds"),
        NamedSlug::new("mirae asset", "mirae-asset-mutual-funds"),
        NamedSlug::new("dsp", "dsp-mutual-funds"),
        NamedSlug::new("tata", "tata-mutual-funds"),
        NamedSlug::new("franklin templeton", "franklin-templeton-mutual-funds"),
        NamedSlug::new("parag parikh", "ppfas-mutual-funds"),
        NamedSlug::new("motilal oswal", "motilal-oswal-mutual-funds"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_mappings_are_valid() {
        let mappings = GrowwMappings::default();
        assert!(mappings.validate().is_ok());
        assert_eq!(mappings.base_url, "https://groww.in");
        assert!(mappings
            .amc_mappings
            .iter()
            .any(|m| m.slug == "hdfc-mutual-funds"));
    }

    #[test]
    fn test_load_json_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r##"{{
                "fund_mappings": [{{"name": "hdfc equity fund", "slug": "hdfc-equity-fund"}}],
                "page_sections": [{{"section": "expense_ratio", "anchor": "#expense_ratio", "keywords": ["expense ratio"]}}]
            }}"##
        )
        .unwrap();

        let mappings = GrowwMappings::from_path(file.path()).unwrap();
        assert_eq!(mappings.fund_mappings.len(), 1);
        assert_eq!(mappings.page_sections[0].anchor, "#expense_ratio");
        // Unspecified tables fall back to the built-in ones.
        assert!(!mappings.amc_mappings.is_empty());
        assert_eq!(mappings.url_patterns, UrlPatterns::default());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "base_url: https://groww.in").unwrap();
        writeln!(file, "amc_mappings:").unwrap();
        writeln!(file, "  - name: quant").unwrap();
        writeln!(file, "    slug: quant-mutual-funds").unwrap();

        let mappings = GrowwMappings::from_path(file.path()).unwrap();
        assert_eq!(mappings.amc_mappings.len(), 1);
        assert_eq!(mappings.amc_mappings[0].slug, "quant-mutual-funds");
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let mut mappings = GrowwMappings::default();
        mappings.url_patterns.fund_details = "/mutual-funds/".to_string();
        assert!(matches!(
            mappings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = GrowwMappings::from_path(Path::new("/nonexistent/groww.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
