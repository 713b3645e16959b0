//! Simulated web search.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DESCRIPTION: &str = "Search for information on a specific topic. Use this to find relevant data before analysis or summarization.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchCategory {
    #[default]
    General,
    News,
    Technical,
    Academic,
}

impl SearchCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchCategory::General => "general",
            SearchCategory::News => "news",
            SearchCategory::Technical => "technical",
            SearchCategory::Academic => "academic",
        }
    }

    fn title(self) -> &'static str {
        match self {
            SearchCategory::General => "General",
            SearchCategory::News => "News",
            SearchCategory::Technical => "Technical",
            SearchCategory::Academic => "Academic",
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// The search query
    pub query: String,
    /// The category of search
    #[serde(default)]
    pub category: SearchCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutput {
    pub query: String,
    pub category: SearchCategory,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
}

/// Lowercased query with every whitespace run, leading and trailing ones
/// included, replaced by a single `-`.
pub fn slug(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut in_space = false;
    for c in query.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

pub fn execute(input: SearchInput) -> SearchOutput {
    let SearchInput { query, category } = input;
    let slug = slug(&query);
    let results = vec![
        SearchResult {
            title: format!("{} Result: {}", category.title(), query),
            snippet: format!(
                "This is a comprehensive {} resource about \"{}\". It covers key concepts, recent developments, and practical applications.",
                category.as_str(),
                query
            ),
            url: format!("https://example.com/{}/{}", category.as_str(), slug),
            relevance_score: 0.95,
        },
        SearchResult {
            title: format!("Expert Analysis: {query}"),
            snippet: format!(
                "In-depth analysis of {query} with data-driven insights and expert commentary."
            ),
            url: format!("https://example.com/analysis/{slug}"),
            relevance_score: 0.88,
        },
        SearchResult {
            title: format!("{query} - Latest Updates"),
            snippet: format!(
                "Stay updated on {query}. Recent findings and developments in the field."
            ),
            url: format!("https://example.com/updates/{slug}"),
            relevance_score: 0.82,
        },
    ];

    SearchOutput {
        query,
        category,
        total_results: results.len(),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_defaults_to_general() {
        let input: SearchInput = serde_json::from_value(json!({"query": "Rust async"})).unwrap();
        assert_eq!(input.category, SearchCategory::General);
    }

    #[test]
    fn output_has_documented_shape() {
        let out = execute(SearchInput {
            query: "Rust  Async Runtimes".into(),
            category: SearchCategory::Technical,
        });
        assert_eq!(out.total_results, 3);
        assert_eq!(out.results[0].title, "Technical Result: Rust  Async Runtimes");
        assert_eq!(
            out.results[0].url,
            "https://example.com/technical/rust-async-runtimes"
        );
        let scores: Vec<f64> = out.results.iter().map(|r| r.relevance_score).collect();
        assert_eq!(scores, vec![0.95, 0.88, 0.82]);

        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["category"], "technical");
        assert_eq!(value["totalResults"], 3);
        assert!(value["results"][1]["relevanceScore"].is_number());
    }

    #[test]
    fn slug_replaces_every_whitespace_run() {
        assert_eq!(slug(" Rust \t Tokio "), "-rust-tokio-");
        assert_eq!(slug("러스트"), "러스트");
    }
}
