//! HTTP providers against a mock server.

use parley_agent::{
    history_budget, ModelProvider, Moderator, OpenAiInstructProvider, OpenAiModerator, OpenAiProvider, PromptBuilder,
    Verdict, VllmProvider,
};
use parley_common::{ModerationConfig, ProviderConfig};
use parley_memory::HistoryItem;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

fn config(name: &str, server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        name: name.into(),
        model: "test-model".into(),
        base_url: Some(server.uri()),
        api_key: Some("sk-testkey".into()),
        max_context_len: 2048,
        max_response_tokens: 250,
        stop_sequences: vec!["\n<messageID".into()],
        ..Default::default()
    }
}

fn conversation() -> Vec<HistoryItem> {
    vec![
        HistoryItem::new("chan", "101", "alice", "anyone around?"),
        HistoryItem::new("chan", "102", "parley", "always"),
        HistoryItem::new("chan", "103", "alice", "parley what's up"),
    ]
}

// ============================================================================
// OpenAI
// ============================================================================

#[tokio::test]
async fn openai_generate_sends_chat_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-testkey"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "max_tokens": 250,
            "messages": [
                { "role": "system" },
                { "role": "user", "name": "alice", "content": "anyone around?" },
                { "role": "assistant", "content": "always" },
                { "role": "user", "name": "alice", "content": "parley what's up" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  not much  " } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&config("openai", &server), PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    let reply = provider.generate(&history, &history[2]).await.unwrap();
    assert_eq!(reply, "not much");
}

#[tokio::test]
async fn openai_streamed_reply_is_accumulated() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
        "data: [DONE]\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let mut cfg = config("openai", &server);
    cfg.stream = true;
    let provider = OpenAiProvider::new(&cfg, PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    let reply = provider.generate(&history, &history[2]).await.unwrap();
    assert_eq!(reply, "Hello, world");
}

#[tokio::test]
async fn openai_error_body_is_sanitized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string("invalid key sk-abcdefghijklmnopqrstuvwxyz123"),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&config("openai", &server), PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    let err = provider.generate(&history, &history[2]).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("401"));
    assert!(!msg.contains("abcdefghijklmnopqrstuvwxyz123"));
}

// ============================================================================
// vLLM
// ============================================================================

#[tokio::test]
async fn vllm_generate_posts_completion_prompt() {
    let server = MockServer::start().await;
    let builder = PromptBuilder::new("parley", None);
    let history = conversation();
    let prompt = builder.completion_prompt(&history, Some("103"));

    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_partial_json(json!({
            "prompt": prompt,
            "stream": false,
            "max_tokens": 250,
            "stop": ["\n<messageID"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": [format!("{prompt} same old, same old")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = VllmProvider::new(&config("vllm", &server), builder).unwrap();
    let reply = provider.generate(&history, &history[2]).await.unwrap();
    assert_eq!(reply, "same old, same old");
}

#[tokio::test]
async fn vllm_counts_tokens_through_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token_usage"))
        .and(body_partial_json(json!({
            "prompt": ["<messageID=101> alice: anyone around?\n"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_count": 12 })))
        .mount(&server)
        .await;

    let provider = VllmProvider::new(&config("vllm", &server), PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    assert_eq!(provider.count_tokens(&history[..1]).await.unwrap(), 12);
}

#[tokio::test]
async fn vllm_server_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = VllmProvider::new(&config("vllm", &server), PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    let err = provider.generate(&history, &history[2]).await.unwrap_err();
    assert!(matches!(err, parley_common::Error::Provider(_)));
}

// ============================================================================
// OpenAI instruct
// ============================================================================

#[tokio::test]
async fn instruct_generate_posts_completion_prompt() {
    let server = MockServer::start().await;
    let builder = PromptBuilder::new("parley", None);
    let history = conversation();
    let prompt = builder.completion_prompt(&history, Some("103"));

    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(header("authorization", "Bearer sk-testkey"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "prompt": prompt,
            "max_tokens": 250,
            "stop": ["\n<messageID"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "text": " just relaying ", "index": 0 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiInstructProvider::new(&config("openai-instruct", &server), builder).unwrap();
    let reply = provider.generate(&history, &history[2]).await.unwrap();
    assert_eq!(reply, "just relaying");
}

#[tokio::test]
async fn instruct_empty_choices_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let provider =
        OpenAiInstructProvider::new(&config("openai-instruct", &server), PromptBuilder::new("parley", None)).unwrap();
    let history = conversation();
    let err = provider.generate(&history, &history[2]).await.unwrap_err();
    assert!(matches!(err, parley_common::Error::Provider(_)));
}

// ============================================================================
// Moderation
// ============================================================================

fn moderator(server: &MockServer) -> OpenAiModerator {
    let cfg = ModerationConfig {
        threshold: Some(0.5),
        base_url: Some(server.uri()),
        ..Default::default()
    };
    OpenAiModerator::new(&cfg, &config("openai", server)).unwrap()
}

#[tokio::test]
async fn moderation_sends_context_and_blocks_above_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/moderations"))
        .and(header("authorization", "Bearer sk-testkey"))
        .and(body_partial_json(json!({
            "model": "text-moderation-latest",
            "input": "alice: anyone around?\nparley: always\nalice: parley what's up\nsomething nasty"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "modr-1",
            "model": "text-moderation-007",
            "results": [{
                "flagged": true,
                "categories": { "harassment": true, "self-harm": true, "violence": false },
                "category_scores": { "harassment": 0.91, "self-harm": 0.12, "violence": 0.7 }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let verdict = moderator(&server).check(&conversation(), "something nasty").await.unwrap();
    assert_eq!(
        verdict,
        Verdict::Blocked {
            reasons: vec!["harassment".into()]
        }
    );
    assert!(!verdict.concerns_self_harm());
}

#[tokio::test]
async fn moderation_unflagged_is_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/moderations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "flagged": false,
                "categories": { "harassment": false },
                "category_scores": { "harassment": 0.01 }
            }]
        })))
        .mount(&server)
        .await;

    let verdict = moderator(&server).check(&[], "hello").await.unwrap();
    assert_eq!(verdict, Verdict::Allowed);
}

#[tokio::test]
async fn moderation_server_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/moderations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = moderator(&server).check(&[], "hello").await.unwrap_err();
    assert!(matches!(err, parley_common::Error::Provider(_)));
}

// ============================================================================
// Token budget
// ============================================================================

#[tokio::test]
async fn history_budget_subtracts_response_and_prompt_overhead() {
    let server = MockServer::start().await;
    // every fixed prompt part counts as 50 tokens
    Mock::given(method("POST"))
        .and(path("/token_usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_count": 50 })))
        .mount(&server)
        .await;

    let cfg = config("vllm", &server);
    let provider = VllmProvider::new(&cfg, PromptBuilder::new("parley", None)).unwrap();
    // three fixed parts: instruction+system, reply instruction, response tail
    assert_eq!(history_budget(&provider, &cfg).await.unwrap(), 2048 - 250 - 150);

    let mut tiny = cfg.clone();
    tiny.max_context_len = 300;
    assert!(history_budget(&provider, &tiny).await.unwrap_err().is_config());
}
