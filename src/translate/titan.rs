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

const TITAN_STYLE: TranscriptStyle = TranscriptStyle {
    user: "User",
    assistant: "Bot",
};

/// Titan text models. Complete responses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitanAdapter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanRequest {
    input_text: String,
    text_generation_config: TextGenerationConfig,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitanResponse {
    #[serde(default)]
    input_text_token_count: Option<u64>,
    #[serde(default)]
    results: Vec<TitanResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitanResult {
    #[serde(default)]
    token_count: Option<u64>,
    #[serde(default)]
    output_text: String,
    #[serde(default)]
    completion_reason: Option<String>,
}

fn map_completion_reason(reason: &str) -> String {
    match reason {
        "FINISH" | "STOP_CRITERIA_MET" => "stop".to_string(),
        "LENGTH" => "length".to_string(),
        "CONTENT_FILTERED" => "content_filter".to_string(),
        other => other.to_lowercase(),
    }
}

impl ModelAdapter for TitanAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Titan
    }

    fn convert_request(
        &self,
        req: &ChatCompletionRequest,
        _images: &ResolvedImages,
    ) -> Result<Value> {
        let req = sanitize_request(BackendFamily::Titan, req);
        let body = TitanRequest {
            input_text: transcript(&flatten_turns(BackendFamily::Titan, &req.messages), TITAN_STYLE),
            text_generation_config: TextGenerationConfig {
                max_token_count: req.max_tokens,
                temperature: req.temperature,
                top_p: req.top_p,
                stop_sequences: req.stop.as_ref().map(|s| s.to_vec()).filter(|s| !s.is_empty()),
            },
        };
        let value = serde_json::to_value(body)?;
        validate_payload(BackendFamily::Titan, &value)?;
        Ok(value)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse> {
        let resp: TitanResponse = serde_json::from_value(body.clone())
            .map_err(|e| BridgeError::conversion(format!("Unexpected Titan response shape: {e}")))?;
        let result = resp
            .results
            .first()
            .ok_or_else(|| BridgeError::conversion("Titan response has no results"))?;

        let usage = match (resp.input_text_token_count, result.token_count) {
            (None, None) => None,
            (p, c) => Some(ChatUsage::new(p.unwrap_or(0), c.unwrap_or(0))),
        };

        Ok(ChatCompletionResponse::single(
            completion_id(),
            model,
            ChoiceMessage {
                role: Role::Assistant,
                content: Some(result.output_text.trim_start().to_string()),
                tool_calls: None,
            },
            result.completion_reason.as_deref().map(map_completion_reason),
            usage,
        ))
    }

    fn stream_converter(&self, _model: &str) -> Result<Box<dyn StreamChunkConverter>> {
        Err(BridgeError::unsupported(self.family().name(), "streaming"))
    }
}
