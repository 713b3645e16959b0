//! Simulated data analysis.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DESCRIPTION: &str = "Analyze data or search results to extract insights and patterns. Use this after gathering information.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Sentiment,
    Trend,
    Comparison,
    Summary,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeInput {
    /// The topic being analyzed
    pub topic: String,
    /// The data or content to analyze
    pub data: String,
    /// The type of analysis to perform
    pub analysis_type: AnalysisType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentBreakdown {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
}

/// Fields that depend on the requested analysis type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum AnalysisDetails {
    Sentiment {
        overall: String,
        confidence: f64,
        breakdown: SentimentBreakdown,
    },
    Trend {
        direction: String,
        momentum: String,
        key_indicators: Vec<String>,
    },
    Comparison {
        aspects: Vec<String>,
        findings: Vec<String>,
    },
    Summary {
        main_points: Vec<String>,
        key_insights: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutput {
    pub topic: String,
    pub analysis_type: AnalysisType,
    pub data_length: usize,
    pub timestamp: String,
    #[serde(flatten)]
    pub details: AnalysisDetails,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn details_for(kind: AnalysisType) -> AnalysisDetails {
    match kind {
        AnalysisType::Sentiment => AnalysisDetails::Sentiment {
            overall: "positive".into(),
            confidence: 0.87,
            breakdown: SentimentBreakdown {
                positive: 0.65,
                neutral: 0.25,
                negative: 0.1,
            },
        },
        AnalysisType::Trend => AnalysisDetails::Trend {
            direction: "upward".into(),
            momentum: "strong".into(),
            key_indicators: strings(&[
                "increasing interest",
                "growing adoption",
                "expanding market",
            ]),
        },
        AnalysisType::Comparison => AnalysisDetails::Comparison {
            aspects: strings(&["feature A vs B", "performance metrics", "user satisfaction"]),
            findings: strings(&["Feature A leads in usability", "B has better performance"]),
        },
        AnalysisType::Summary => AnalysisDetails::Summary {
            main_points: strings(&[
                "Core concept explanation",
                "Key benefits identified",
                "Potential challenges noted",
            ]),
            key_insights: strings(&["High relevance to current trends", "Strong community support"]),
        },
    }
}

pub fn execute(input: AnalyzeInput) -> AnalyzeOutput {
    AnalyzeOutput {
        data_length: input.data.chars().count(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        details: details_for(input.analysis_type),
        analysis_type: input.analysis_type,
        topic: input.topic,
    }
}
