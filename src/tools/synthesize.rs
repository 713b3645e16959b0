//! Simulated synthesis of search findings and analysis insights.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DESCRIPTION: &str = "Synthesize multiple pieces of information into a coherent response. Use this as the final step to combine search results and analysis into a comprehensive answer.";

const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesisFormat {
    Brief,
    #[default]
    Detailed,
    BulletPoints,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeInput {
    /// The main topic
    pub topic: String,
    /// Summary of search results
    pub search_summary: String,
    /// Key insights from analysis
    pub analysis_insights: String,
    /// Output format
    #[serde(default)]
    pub format: SynthesisFormat,
}

/// Fields that depend on the requested output format.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum SynthesisBody {
    Brief {
        summary: String,
        word_count: u32,
    },
    Detailed {
        introduction: String,
        body: String,
        conclusion: String,
        word_count: u32,
    },
    BulletPoints {
        points: Vec<String>,
        word_count: u32,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeOutput {
    pub topic: String,
    pub format: SynthesisFormat,
    pub synthesized_at: String,
    #[serde(flatten)]
    pub body: SynthesisBody,
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

pub fn execute(input: SynthesizeInput) -> SynthesizeOutput {
    let SynthesizeInput {
        topic,
        search_summary,
        analysis_insights,
        format,
    } = input;

    let body = match format {
        SynthesisFormat::Brief => SynthesisBody::Brief {
            summary: format!(
                "Quick overview of {topic}: Based on the gathered information, the key takeaway is that this topic shows significant relevance and positive trends."
            ),
            word_count: 50,
        },
        SynthesisFormat::Detailed => SynthesisBody::Detailed {
            introduction: format!("Comprehensive analysis of {topic}"),
            body: format!(
                "The research reveals several important aspects. {search_summary} Furthermore, {analysis_insights}"
            ),
            conclusion: "This synthesis provides a well-rounded understanding of the topic."
                .to_string(),
            word_count: 200,
        },
        SynthesisFormat::BulletPoints => SynthesisBody::BulletPoints {
            points: vec![
                format!("Topic: {topic}"),
                format!("Search findings: {}...", excerpt(&search_summary)),
                format!("Analysis: {}...", excerpt(&analysis_insights)),
                "Recommendation: Further investigation recommended".to_string(),
            ],
            word_count: 100,
        },
    };

    SynthesizeOutput {
        topic,
        format,
        synthesized_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(format: Option<&str>) -> SynthesizeInput {
        let mut raw = json!({
            "topic": "양자 컴퓨팅",
            "searchSummary": "s".repeat(150),
            "analysisInsights": "insight",
        });
        if let Some(f) = format {
            raw["format"] = json!(f);
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn format_defaults_to_detailed() {
        let out = serde_json::to_value(execute(input(None))).unwrap();
        assert_eq!(out["format"], "detailed");
        assert_eq!(out["wordCount"], 200);
        assert_eq!(out["introduction"], "Comprehensive analysis of 양자 컴퓨팅");
        assert!(out["synthesizedAt"].is_string());
    }

    #[test]
    fn bullet_points_truncate_excerpts() {
        let out = serde_json::to_value(execute(input(Some("bullet-points")))).unwrap();
        let points = out["points"].as_array().unwrap();
        assert_eq!(points.len(), 4);
        let findings = points[1].as_str().unwrap();
        assert_eq!(findings, format!("Search findings: {}...", "s".repeat(100)));
        assert_eq!(out["wordCount"], 100);
    }

    #[test]
    fn brief_has_summary() {
        let out = serde_json::to_value(execute(input(Some("brief")))).unwrap();
        assert!(out["summary"].as_str().unwrap().starts_with("Quick overview of"));
        assert_eq!(out["wordCount"], 50);
    }
}
