//! Converts one conversation for every backend family and parses a canned
//! response, without touching the network.
//!
//! Run with `RUST_LOG=model_bridge=debug cargo run --example translate_only`.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use model_bridge::images::PrefetchedImages;
use model_bridge::translate::canonical_types::{ChatCompletionRequest, ChatMessage};
use model_bridge::{init_tracing, Bridge, BridgeConfig, BridgeError};
use serde_json::json;

const MODELS: &[&str] = &[
    "anthropic.claude-3-5-sonnet-20240620-v1:0",
    "meta.llama3-70b-instruct-v1:0",
    "mistral.mistral-large-2402-v1:0",
    "amazon.titan-text-express-v1",
    "ai21.j2-ultra-v1",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let bridge = Bridge::with_fetcher(
        BridgeConfig::default(),
        Arc::new(PrefetchedImages::default()),
    );

    for model in MODELS {
        let req = ChatCompletionRequest {
            model: (*model).to_string(),
            messages: vec![
                ChatMessage::system("You are terse."),
                ChatMessage::user("Name a prime number."),
            ],
            max_tokens: Some(64),
            temperature: Some(0.2),
            ..ChatCompletionRequest::default()
        };

        let prepared = bridge.prepare(&req).await?;
        println!("--- {} ({})", model, prepared.family());
        println!("{}", serde_json::to_string_pretty(&prepared.body)?);
    }

    let claude = bridge
        .prepare(&ChatCompletionRequest {
            model: MODELS[0].to_string(),
            messages: vec![ChatMessage::user("Name a prime number.")],
            ..ChatCompletionRequest::default()
        })
        .await?;
    let response = claude.convert_response(&json!({
        "id": "msg_demo",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": "7"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 14, "output_tokens": 1}
    }))?;
    println!("--- parsed response");
    println!("{}", serde_json::to_string_pretty(&response)?);

    let mut streaming = ChatCompletionRequest {
        model: MODELS[1].to_string(),
        messages: vec![ChatMessage::user("Count to three.")],
        ..ChatCompletionRequest::default()
    };
    streaming.stream = Some(true);
    let prepared = bridge.prepare(&streaming).await?;

    let body = futures::stream::iter(
        [
            "{\"generation\":\"1, 2\",\"prompt_token_count\":9,\"generation_token_count\":3,\"stop_reason\":null}\n",
            "{\"generation\":\", 3\",\"prompt_token_count\":null,\"generation_token_count\":5,\"stop_reason\":\"stop\"}\n",
        ]
        .map(|s| Ok::<_, BridgeError>(Bytes::from_static(s.as_bytes()))),
    );

    println!("--- streamed chunks");
    let mut chunks = Box::pin(bridge.stream_response(&prepared, body)?);
    while let Some(chunk) = chunks.next().await {
        println!("{}", serde_json::to_string(&chunk?)?);
    }

    Ok(())
}
