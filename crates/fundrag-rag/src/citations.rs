use fundrag_core::{SourceCitation, SourcePriority};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

static MARKER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(\s*)\[(source\s+)?(\d+)\]").ok());

fn parse_lenient(url: &str) -> Option<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let web = |u: &Url| matches!(u.scheme(), "http" | "https") && u.host_str().is_some();
    Url::parse(trimmed)
        .ok()
        .filter(web)
        .or_else(|| Url::parse(&format!("https://{}", trimmed)).ok().filter(web))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Rank a URL by who published it.
pub fn classify_source(url: &str) -> SourcePriority {
    let Some(parsed) = parse_lenient(url) else {
        return SourcePriority::Unknown;
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if host_matches(&host, "groww.in") {
        SourcePriority::Groww
    } else if host_matches(&host, "sebi.gov.in") {
        SourcePriority::Sebi
    } else if host_matches(&host, "amfiindia.com") {
        SourcePriority::Amfi
    } else {
        SourcePriority::Amc
    }
}

/// Readable title from the last path segment, e.g. `hdfc-equity-fund` -> `Hdfc Equity Fund`.
pub fn title_from_url(url: &str) -> String {
    let Some(parsed) = parse_lenient(url) else {
        return "Source".to_string();
    };
    let last = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string());

    match last {
        Some(segment) => segment
            .replace(['-', '_'], " ")
            .split_whitespace()
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" "),
        None => parsed.host_str().unwrap_or("Source").to_string(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

pub fn citation_for(url: &str, title: Option<&str>) -> SourceCitation {
    SourceCitation {
        url: url.to_string(),
        title: title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| title_from_url(url)),
        source_priority: classify_source(url),
    }
}

/// Host and path used to compare URLs, ignoring scheme, case and a trailing slash.
pub fn url_key(url: &str) -> String {
    url.trim()
        .trim_end_matches('/')
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_lowercase()
}

/// Rewrite the model's citation markers to positions in the Sources list.
///
/// `position_of` maps a prompt source number to its 1-based position in the
/// rendered citations. `[Source N]` and `[N]` that resolve become `[position]`.
/// An unresolvable `[Source N]` is removed; an unresolvable bare `[N]` is left
/// as written since it may be a year or a footnote. Returns the rewritten text
/// and the number of markers that resolved.
pub fn resolve_markers<F>(text: &str, position_of: F) -> (String, usize)
where
    F: Fn(usize) -> Option<usize>,
{
    let Some(re) = MARKER.as_ref() else {
        return (text.to_string(), 0);
    };
    let mut resolved = 0usize;
    let rewritten = re.replace_all(text, |caps: &Captures| {
        let spacing = caps.get(1).map_or("", |m| m.as_str());
        let labelled = caps.get(2).is_some();
        let position = caps
            .get(3)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .and_then(&position_of);
        match position {
            Some(position) => {
                resolved += 1;
                format!("{}[{}]", spacing, position)
            }
            None if labelled => String::new(),
            None => caps[0].to_string(),
        }
    });
    (rewritten.into_owned(), resolved)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationStyle {
    #[default]
    Plain,
    Markdown,
}

/// Renders answers and their source lists for display.
#[derive(Debug, Clone, Default)]
pub struct CitationFormatter {
    style: CitationStyle,
}

impl CitationFormatter {
    pub fn new(style: CitationStyle) -> Self {
        Self { style }
    }

    pub fn format_sources(&self, citations: &[SourceCitation]) -> String {
        if citations.is_empty() {
            return String::new();
        }
        let mut lines = Vec::with_capacity(citations.len() + 1);
        match self.style {
            CitationStyle::Markdown => {
                lines.push("## Sources".to_string());
                for (i, c) in citations.iter().enumerate() {
                    lines.push(format!("{}. [{}]({})", i + 1, c.title, c.url));
                }
            }
            CitationStyle::Plain => {
                lines.push("Sources:".to_string());
                for (i, c) in citations.iter().enumerate() {
                    lines.push(format!("[{}] {} ({})", i + 1, c.title, c.url));
                }
            }
        }
        lines.join("\n")
    }

    /// Answer text followed by its Sources section. Markers in an assembled
    /// answer already number into `citations`.
    pub fn render(&self, answer_text: &str, citations: &[SourceCitation]) -> String {
        let sources = self.format_sources(citations);
        if sources.is_empty() {
            answer_text.to_string()
        } else {
            format!("{}\n\n{}", answer_text, sources)
        }
    }
}
