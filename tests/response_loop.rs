use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_openai::types::{ChatCompletionRequestMessage, CreateChatCompletionRequest};
use futures::StreamExt;
use research_chat::provider::ProviderStream;
use research_chat::{
    AbortReason, LoopEvent, LoopOutcome, LoopPhase, MessageAccumulator, ProviderChunk,
    ResponseLoop, ScriptedProvider, ScriptedTurn, StepProvider, ToolLatency, ToolRegistry,
    UiChunk, UiMessage,
};
use serde_json::json;
use tower::BoxError;

fn response_loop(provider: impl StepProvider, latency: ToolLatency) -> ResponseLoop {
    ResponseLoop::new(Arc::new(provider), ToolRegistry::new(latency), "test-model").unwrap()
}

async fn run(lp: &ResponseLoop, text: &str) -> (Vec<UiChunk>, LoopOutcome) {
    let events: Vec<LoopEvent> = lp.run(&[UiMessage::user_text(text)]).unwrap().collect().await;
    let mut chunks = Vec::new();
    let mut outcome = None;
    for event in events {
        match event {
            LoopEvent::Chunk(c) => chunks.push(c),
            LoopEvent::Finished(o) => outcome = Some(o),
        }
    }
    (chunks, outcome.expect("loop publishes an outcome"))
}

fn accumulate(chunks: &[UiChunk]) -> MessageAccumulator {
    let mut acc = MessageAccumulator::new();
    for c in chunks {
        acc.apply(c);
    }
    acc
}

#[tokio::test]
async fn loop_stops_at_step_budget_when_model_always_calls_tools() {
    let provider = ScriptedProvider::new(vec![ScriptedTurn::tool_call(
        "call",
        "search",
        json!({"query": "끝없는 검색"}),
    )]);
    let lp = response_loop(provider.clone(), ToolLatency::none());
    let (chunks, outcome) = run(&lp, "계속 검색해").await;

    assert_eq!(provider.calls(), 5);
    assert_eq!(outcome.steps, 5);
    assert_eq!(outcome.stop, LoopPhase::Aborted(AbortReason::StepBudgetExceeded));

    let starts = chunks.iter().filter(|c| **c == UiChunk::StartStep).count();
    let finishes = chunks.iter().filter(|c| **c == UiChunk::FinishStep).count();
    assert_eq!((starts, finishes), (5, 5));
    let outputs = chunks
        .iter()
        .filter(|c| matches!(c, UiChunk::ToolOutputAvailable { .. }))
        .count();
    assert_eq!(outputs, 5);
    assert_eq!(chunks.last(), Some(&UiChunk::Finish));
}

#[tokio::test]
async fn step_budget_is_configurable() {
    let provider = ScriptedProvider::new(vec![ScriptedTurn::tool_call(
        "call",
        "weather",
        json!({"location": "부산"}),
    )]);
    let lp = response_loop(provider.clone(), ToolLatency::none()).with_max_steps(2);
    let (_, outcome) = run(&lp, "날씨").await;
    assert_eq!(provider.calls(), 2);
    assert_eq!(outcome.steps, 2);
}

#[tokio::test(start_paused = true)]
async fn parallel_results_are_appended_in_call_order() {
    let latency = ToolLatency {
        search: Duration::from_millis(900),
        weather: Duration::from_millis(10),
        ..ToolLatency::none()
    };
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::tool_calls(&[
            ("call_search", "search", json!({"query": "제주 여행"})),
            ("call_weather", "weather", json!({"location": "제주"})),
        ]),
        ScriptedTurn::text("정리했습니다."),
    ]);
    let lp = response_loop(provider.clone(), latency);
    let (chunks, outcome) = run(&lp, "제주 여행 정보와 날씨").await;

    let completion_order: Vec<&str> = chunks
        .iter()
        .filter_map(|c| match c {
            UiChunk::ToolOutputAvailable { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completion_order, vec!["call_weather", "call_search"]);

    let history_order: Vec<String> = outcome
        .messages
        .iter()
        .filter_map(|m| match m {
            ChatCompletionRequestMessage::Tool(t) => Some(t.tool_call_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(history_order, vec!["call_search", "call_weather"]);

    let second_request = &provider.requests()[1];
    let roles: Vec<String> = second_request
        .messages
        .iter()
        .map(|m| serde_json::to_value(m).unwrap()["role"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "tool", "tool"]);
    assert_eq!(outcome.stop, LoopPhase::Done);
}

#[tokio::test(start_paused = true)]
async fn slow_tool_times_out_as_output_error_and_loop_continues() {
    let latency = ToolLatency {
        analyze: Duration::from_secs(120),
        ..ToolLatency::none()
    };
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::tool_call(
            "call_a",
            "analyze",
            json!({"topic": "t", "data": "d", "analysisType": "trend"}),
        ),
        ScriptedTurn::text("분석에 실패했습니다."),
    ]);
    let lp = response_loop(provider.clone(), latency).with_tool_timeout(Some(Duration::from_secs(1)));
    let (chunks, outcome) = run(&lp, "분석해줘").await;

    assert!(chunks.iter().any(|c| matches!(
        c,
        UiChunk::ToolOutputError { tool_call_id, error_text }
            if tool_call_id == "call_a" && error_text.contains("timed out after 1000ms")
    )));
    assert_eq!(provider.calls(), 2);
    assert_eq!(outcome.stop, LoopPhase::Done);
    assert!(accumulate(&chunks).all_tools_terminal());
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("call_x", "translate", json!({"text": "hi"})),
        ScriptedTurn::text("번역 도구는 없습니다."),
    ]);
    let lp = response_loop(provider.clone(), ToolLatency::none());
    let (chunks, _) = run(&lp, "번역해줘").await;

    assert!(chunks.iter().any(|c| matches!(
        c,
        UiChunk::ToolOutputError { error_text, .. } if error_text.contains("unknown tool")
    )));
    let second = serde_json::to_value(&provider.requests()[1].messages).unwrap();
    let tool_msg = second.as_array().unwrap().iter().find(|m| m["role"] == "tool").unwrap();
    assert!(tool_msg["content"].as_str().unwrap().contains("unknown tool"));
}

#[tokio::test]
async fn provider_failure_mid_stream_closes_open_calls() {
    let provider = ScriptedProvider::new(vec![ScriptedTurn::FailAfter(
        vec![
            ProviderChunk::TextDelta("확인".into()),
            ProviderChunk::ToolCallStart { index: 0, id: "call_1".into(), name: "weather".into() },
            ProviderChunk::ToolCallDelta { index: 0, arguments: "{\"loc".into() },
        ],
        "connection reset".into(),
    )]);
    let lp = response_loop(provider, ToolLatency::none());
    let (chunks, outcome) = run(&lp, "날씨").await;

    assert!(matches!(outcome.stop, LoopPhase::Aborted(AbortReason::Provider(ref e)) if e.contains("connection reset")));
    assert!(chunks.iter().any(|c| matches!(c, UiChunk::TextEnd { .. })));
    assert!(!chunks.contains(&UiChunk::Finish));

    let acc = accumulate(&chunks);
    assert_eq!(acc.errors().len(), 1);
    assert!(acc.all_tools_terminal());
}

struct Stalled;

impl StepProvider for Stalled {
    fn stream_step(
        &self,
        _req: CreateChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderStream, BoxError>> + Send>> {
        Box::pin(async {
            let stalled = futures::stream::pending::<Result<ProviderChunk, BoxError>>();
            Ok(Box::pin(stalled) as ProviderStream)
        })
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_model_step_times_out() {
    let lp = response_loop(Stalled, ToolLatency::none()).with_step_timeout(Some(Duration::from_secs(5)));
    let (chunks, outcome) = run(&lp, "안녕").await;
    assert!(chunks.iter().any(
        |c| matches!(c, UiChunk::Error { error_text } if error_text.contains("timed out"))
    ));
    assert!(matches!(outcome.stop, LoopPhase::Aborted(AbortReason::Provider(_))));
}

#[tokio::test]
async fn stream_reconstructs_multi_step_message() {
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("s1", "search", json!({"query": "러스트", "category": "technical"})),
        ScriptedTurn::tool_call(
            "a1",
            "analyze",
            json!({"topic": "러스트", "data": "결과", "analysisType": "summary"}),
        ),
        ScriptedTurn::tool_call(
            "y1",
            "synthesize",
            json!({"topic": "러스트", "searchSummary": "s", "analysisInsights": "i", "format": "brief"}),
        ),
        ScriptedTurn::text("러스트는 안전한 시스템 언어입니다."),
    ]);
    let lp = response_loop(provider, ToolLatency::none());
    let (chunks, outcome) = run(&lp, "러스트에 대해 알려줘").await;
    assert_eq!(outcome.steps, 4);

    let message = accumulate(&chunks).into_message();
    let names: Vec<&str> = message.tool_parts().map(|t| t.tool_name.as_str()).collect();
    assert_eq!(names, vec!["search", "analyze", "synthesize"]);
    let synth = message.tool_parts().last().unwrap().output.clone().unwrap();
    assert_eq!(synth["wordCount"], 50);
    assert_eq!(message.text(), "러스트는 안전한 시스템 언어입니다.");
}
