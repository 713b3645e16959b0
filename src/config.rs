//! Configuration for the chat service
//!
//! Defaults reproduce the deployed behavior (10 requests per client per 24h,
//! five loop steps, the research-assistant system prompt); environment
//! variables override individual values.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ChatError, Result};

/// Research-assistant policy handed to the model on every turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "당신은 여러 도구를 사용하여 종합적인 답변을 제공하는 유능한 리서치 어시스턴트입니다.

사용 가능한 도구:
- weather: 특정 도시의 날씨 정보를 가져옵니다
- search: 정보를 검색합니다
- analyze: 데이터를 분석합니다
- synthesize: 정보를 종합합니다

날씨 관련 질문:
- 사용자가 날씨에 대해 물어보면 weather 도구를 사용하세요
- 날씨 도구 사용 후 결과에 대해 간단히 설명해주세요

일반 질문:
1. search 도구로 정보 검색
2. analyze 도구로 분석
3. synthesize 도구로 종합

모든 응답은 한국어로 제공하세요.";

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,

    /// Model identifier sent to the provider
    pub model: String,

    /// Base URL of the OpenAI-compatible API
    pub api_base: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Per-client admission control
    pub rate_limit: RateLimitConfig,

    /// Maximum number of model turns per request
    pub max_steps: usize,

    /// Simulated tool latencies
    pub tool_latency: ToolLatency,

    /// Upper bound on a single tool execution
    pub tool_timeout: Option<Duration>,

    /// Upper bound on a single model turn
    pub step_timeout: Option<Duration>,

    /// System instructions for the model
    pub system_prompt: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            model: "llama-3.1-8b-instant".to_string(),
            api_base: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            rate_limit: RateLimitConfig::default(),
            max_steps: 5,
            tool_latency: ToolLatency::default(),
            tool_timeout: Some(Duration::from_secs(30)),
            step_timeout: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Fixed-window rate limit configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admitted requests per client per window
    pub limit: u32,

    /// Window length
    pub window: Duration,

    /// Upper bound on tracked clients
    pub max_entries: usize,

    /// How often expired records are swept
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(24 * 60 * 60),
            max_entries: 100_000,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Artificial delay applied by each simulated tool
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolLatency {
    pub search: Duration,
    pub analyze: Duration,
    pub synthesize: Duration,
    pub weather: Duration,
}

impl Default for ToolLatency {
    fn default() -> Self {
        Self {
            search: Duration::from_millis(1000),
            analyze: Duration::from_millis(1200),
            synthesize: Duration::from_millis(800),
            weather: Duration::from_millis(1000),
        }
    }
}

impl ToolLatency {
    /// No artificial delay; used by tests and benchmarks.
    pub fn none() -> Self {
        Self {
            search: Duration::ZERO,
            analyze: Duration::ZERO,
            synthesize: Duration::ZERO,
            weather: Duration::ZERO,
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` onto the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHAT_BIND_ADDR") {
            config.bind_addr = parse_var("CHAT_BIND_ADDR", &addr)?;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            config.model = model;
        }
        if let Some(base) = lookup("CHAT_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(limit) = lookup("CHAT_RATE_LIMIT") {
            config.rate_limit.limit = parse_var("CHAT_RATE_LIMIT", &limit)?;
            if config.rate_limit.limit == 0 {
                return Err(ChatError::config("CHAT_RATE_LIMIT must be at least 1"));
            }
        }
        if let Some(secs) = lookup("CHAT_RATE_WINDOW_SECS") {
            config.rate_limit.window = Duration::from_secs(parse_var("CHAT_RATE_WINDOW_SECS", &secs)?);
        }
        if let Some(steps) = lookup("CHAT_MAX_STEPS") {
            config.max_steps = parse_var("CHAT_MAX_STEPS", &steps)?;
            if config.max_steps == 0 {
                return Err(ChatError::config("CHAT_MAX_STEPS must be at least 1"));
            }
        }
        if let Some(secs) = lookup("CHAT_TOOL_TIMEOUT_SECS") {
            let secs: u64 = parse_var("CHAT_TOOL_TIMEOUT_SECS", &secs)?;
            config.tool_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = lookup("CHAT_STEP_TIMEOUT_SECS") {
            let secs: u64 = parse_var("CHAT_STEP_TIMEOUT_SECS", &secs)?;
            config.step_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ChatError::config(format!("invalid {name}={raw:?}: {e}")))
}
