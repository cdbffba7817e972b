use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::canonical_types::{
    completion_id, ChatCompletionRequest, ChatCompletionResponse, ChatUsage, ChoiceMessage, Role,
};
use super::prompt::{flatten_turns, transcript, TranscriptStyle};
use crate::adapter::{BackendFamily, ModelAdapter, StreamChunkConverter};
use crate::error::{BridgeError, Result};
use crate::images::ResolvedImages;
use crate::validation::{sanitize_request, validate_payload};

const AI21_STYLE: TranscriptStyle = TranscriptStyle {
    user: "User",
    assistant: "Assistant",
};

/// Jurassic-2 models. Complete responses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ai21Adapter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Ai21Request {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<Penalty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<Penalty>,
}

#[derive(Debug, Serialize)]
struct Penalty {
    scale: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ai21Response {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    prompt: Option<TokenList>,
    #[serde(default)]
    completions: Vec<Ai21Completion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ai21Completion {
    data: CompletionData,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize)]
struct CompletionData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tokens: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TokenList {
    #[serde(default)]
    tokens: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FinishReason {
    #[serde(default)]
    reason: String,
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "endoftext" | "stop" => "stop".to_string(),
        other => other.to_string(),
    }
}

/// AI21 ids arrive as numbers or strings.
fn response_id(id: Option<&Value>) -> String {
    match id {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => completion_id(),
    }
}

impl ModelAdapter for Ai21Adapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Ai21
    }

    fn convert_request(
        &self,
        req: &ChatCompletionRequest,
        _images: &ResolvedImages,
    ) -> Result<Value> {
        let req = sanitize_request(BackendFamily::Ai21, req);
        let body = Ai21Request {
            prompt: transcript(&flatten_turns(BackendFamily::Ai21, &req.messages), AI21_STYLE),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop.as_ref().map(|s| s.to_vec()).filter(|s| !s.is_empty()),
            presence_penalty: req.presence_penalty.map(|scale| Penalty { scale }),
            frequency_penalty: req.frequency_penalty.map(|scale| Penalty { scale }),
        };
        let value = serde_json::to_value(body)?;
        validate_payload(BackendFamily::Ai21, &value)?;
        Ok(value)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse> {
        let resp: Ai21Response = serde_json::from_value(body.clone())
            .map_err(|e| BridgeError::conversion(format!("Unexpected AI21 response shape: {e}")))?;
        let completion = resp
            .completions
            .first()
            .ok_or_else(|| BridgeError::conversion("AI21 response has no completions"))?;

        let usage = resp.prompt.as_ref().map(|p| {
            ChatUsage::new(p.tokens.len() as u64, completion.data.tokens.len() as u64)
        });

        Ok(ChatCompletionResponse::single(
            response_id(resp.id.as_ref()),
            model,
            ChoiceMessage {
                role: Role::Assistant,
                content: Some(completion.data.text.trim_start().to_string()),
                tool_calls: None,
            },
            completion
                .finish_reason
                .as_ref()
                .map(|f| map_finish_reason(&f.reason)),
            usage,
        ))
    }

    fn stream_converter(&self, _model: &str) -> Result<Box<dyn StreamChunkConverter>> {
        Err(BridgeError::unsupported(self.family().name(), "streaming"))
    }
}
