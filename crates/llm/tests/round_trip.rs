use llm::{
    ProviderFamily,
    messages::unified::{UnifiedContentPart, UnifiedFinishReason, UnifiedMessage},
    provider::{
        DisabledImageFetcher, Encoder, anthropic::AnthropicEncoder, google::GoogleEncoder, openai::OpenAiEncoder,
    },
};
use serde_json::{Value, json};

fn assistant_parts() -> Vec<UnifiedContentPart> {
    vec![
        UnifiedContentPart::text("Searching the docs."),
        UnifiedContentPart::tool_call("call_1", "search", json!({"query": "tokio select", "limit": 3})),
        UnifiedContentPart::tool_call("call_2", "open", json!({"path": "/guide/select.md"})),
    ]
}

fn without_ids(parts: &[UnifiedContentPart]) -> Vec<UnifiedContentPart> {
    parts
        .iter()
        .cloned()
        .map(|part| match part {
            UnifiedContentPart::ToolCall { name, input, .. } => UnifiedContentPart::ToolCall {
                id: String::new(),
                name,
                input,
            },
            other => other,
        })
        .collect()
}

#[tokio::test]
async fn openai() {
    let message = UnifiedMessage::assistant_with_parts(assistant_parts());
    let encoded = OpenAiEncoder.encode_messages(&[message]).await.unwrap();

    let body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": encoded.messages[0], "finish_reason": "tool_calls"}],
    });

    let response = ProviderFamily::OpenAi.decode_response(&body.to_string()).unwrap();

    assert_eq!(response.parts, assistant_parts());
    assert_eq!(response.finish_reason, UnifiedFinishReason::ToolCalls);
}

#[tokio::test]
async fn anthropic() {
    let message = UnifiedMessage::assistant_with_parts(assistant_parts());
    let encoded = AnthropicEncoder::new(&DisabledImageFetcher)
        .encode_messages(&[message])
        .await
        .unwrap();

    let mut body = serde_json::to_value(&encoded.messages[0]).unwrap();
    body["stop_reason"] = json!("tool_use");
    body["usage"] = json!({"input_tokens": 5, "output_tokens": 9});

    let response = ProviderFamily::Anthropic.decode_response(&body.to_string()).unwrap();

    assert_eq!(response.parts, assistant_parts());
    assert_eq!(response.finish_reason, UnifiedFinishReason::ToolCalls);
}

#[tokio::test]
async fn google_regenerates_ids() {
    let message = UnifiedMessage::assistant_with_parts(assistant_parts());
    let encoded = GoogleEncoder::new(&DisabledImageFetcher)
        .encode_messages(&[message])
        .await
        .unwrap();

    let body = json!({
        "candidates": [{"content": encoded.messages[0], "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6, "totalTokenCount": 10},
    });

    let response = ProviderFamily::Google.decode_response(&body.to_string()).unwrap();

    assert_eq!(without_ids(&response.parts), without_ids(&assistant_parts()));
    assert_eq!(response.finish_reason, UnifiedFinishReason::ToolCalls);

    let ids: Vec<&str> = response
        .parts
        .iter()
        .filter_map(|part| match part {
            UnifiedContentPart::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| id.starts_with("call_")));
}

#[tokio::test]
async fn single_user_message_per_provider() {
    let messages = [UnifiedMessage::user("hi")];

    let openai = OpenAiEncoder.encode_messages(&messages).await.unwrap();
    assert_eq!(openai.messages.len(), 1);
    assert_eq!(serde_json::to_value(&openai.messages[0]).unwrap(), json!({"role": "user", "content": "hi"}));

    let anthropic = AnthropicEncoder::new(&DisabledImageFetcher)
        .encode_messages(&messages)
        .await
        .unwrap();
    assert_eq!(anthropic.system, None);

    let google = GoogleEncoder::new(&DisabledImageFetcher)
        .encode_messages(&messages)
        .await
        .unwrap();

    let contents: Value = serde_json::to_value(&google.messages).unwrap();
    assert_eq!(contents, json!([{"role": "user", "parts": [{"text": "hi"}]}]));
}

#[tokio::test]
async fn decoded_response_continues_the_conversation_elsewhere() {
    let body = json!({
        "content": [
            {"type": "text", "text": "Checking the forecast."},
            {"type": "tool_use", "id": "toolu_01", "name": "forecast", "input": {"city": "Oslo"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 11, "output_tokens": 7}
    });

    let response = ProviderFamily::Anthropic.decode_response(&body.to_string()).unwrap();
    let history = vec![UnifiedMessage::user("Oslo tomorrow?"), response.into_message()];

    let encoded = OpenAiEncoder.encode_messages(&history).await.unwrap();
    let assistant = serde_json::to_value(&encoded.messages[1]).unwrap();

    assert_eq!(assistant["role"], "assistant");
    assert_eq!(assistant["content"], "Checking the forecast.");
    assert_eq!(assistant["tool_calls"][0]["id"], "toolu_01");
    assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"city":"Oslo"}"#);
}
