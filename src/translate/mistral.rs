use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::canonical_types::{
    completion_id, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatUsage,
    ChoiceMessage, Role,
};
use super::claude_types::Usage;
use super::prompt::{flatten_turns, mistral_template};
use super::text_stream::TextStreamState;
use crate::adapter::{line_payload, BackendFamily, ModelAdapter, StreamChunkConverter};
use crate::error::{BridgeError, Result};
use crate::images::ResolvedImages;
use crate::validation::{sanitize_request, validate_payload};

#[derive(Debug, Clone, Copy, Default)]
pub struct MistralAdapter;

#[derive(Debug, Serialize)]
struct MistralRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MistralOutputs {
    #[serde(default)]
    outputs: Vec<MistralOutput>,
    #[serde(rename = "amazon-bedrock-invocationMetrics", default)]
    invocation_metrics: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct MistralOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl MistralOutputs {
    fn text(&self) -> String {
        self.outputs.iter().map(|o| o.text.as_str()).collect()
    }

    fn stop_reason(&self) -> Option<String> {
        self.outputs.iter().find_map(|o| o.stop_reason.clone())
    }

    fn usage(&self) -> Option<ChatUsage> {
        self.invocation_metrics.as_ref().map(|m| {
            ChatUsage::new(m.input_tokens().unwrap_or(0), m.output_tokens().unwrap_or(0))
        })
    }
}

impl ModelAdapter for MistralAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Mistral
    }

    fn convert_request(
        &self,
        req: &ChatCompletionRequest,
        _images: &ResolvedImages,
    ) -> Result<Value> {
        let req = sanitize_request(BackendFamily::Mistral, req);
        let body = MistralRequest {
            prompt: mistral_template(&flatten_turns(BackendFamily::Mistral, &req.messages)),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop: req.stop.as_ref().map(|s| s.to_vec()).filter(|s| !s.is_empty()),
        };
        let value = serde_json::to_value(body)?;
        validate_payload(BackendFamily::Mistral, &value)?;
        Ok(value)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse> {
        let resp: MistralOutputs = serde_json::from_value(body.clone()).map_err(|e| {
            BridgeError::conversion(format!("Unexpected Mistral response shape: {e}"))
        })?;
        if resp.outputs.is_empty() {
            return Err(BridgeError::conversion("Mistral response has no outputs"));
        }

        Ok(ChatCompletionResponse::single(
            completion_id(),
            model,
            ChoiceMessage {
                role: Role::Assistant,
                content: Some(resp.text()),
                tool_calls: None,
            },
            resp.stop_reason(),
            resp.usage(),
        ))
    }

    fn stream_converter(&self, model: &str) -> Result<Box<dyn StreamChunkConverter>> {
        Ok(Box::new(MistralStreamConverter {
            state: TextStreamState::new(model),
        }))
    }
}

struct MistralStreamConverter {
    state: TextStreamState,
}

impl StreamChunkConverter for MistralStreamConverter {
    fn convert_stream_chunk(&mut self, line: &str) -> Result<Option<ChatCompletionChunk>> {
        let Some(payload) = line_payload(line) else {
            return Ok(None);
        };
        let piece: MistralOutputs = serde_json::from_str(payload)
            .map_err(|e| BridgeError::stream_parse(e.to_string(), line))?;
        Ok(self
            .state
            .emit(Some(piece.text()), piece.stop_reason(), piece.usage()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical_types::{ChatMessage, StopSequences};
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let req = ChatCompletionRequest {
            model: "mistral.mistral-large-2402-v1:0".to_string(),
            messages: vec![ChatMessage::user("Hello")],
            top_k: Some(50),
            stop: Some(StopSequences::Single("###".to_string())),
            presence_penalty: Some(0.5),
            ..ChatCompletionRequest::default()
        };
        let body = MistralAdapter
            .convert_request(&req, &ResolvedImages::new())
            .unwrap();
        assert_eq!(body["prompt"], "<s>[INST] Hello [/INST]");
        assert_eq!(body["top_k"], 50);
        assert_eq!(body["stop"], json!(["###"]));
        assert!(body.get("presence_penalty").is_none());
    }

    #[test]
    fn test_response() {
        let body = json!({"outputs": [{"text": "Bonjour", "stop_reason": "stop"}]});
        let resp = MistralAdapter.convert_response(&body, "mistral.large").unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Bonjour"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(resp.usage.is_none());
    }

    #[test]
    fn test_empty_outputs_is_conversion_error() {
        let err = MistralAdapter
            .convert_response(&json!({"outputs": []}), "m")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Conversion { .. }));
    }

    #[test]
    fn test_stream_with_metrics() {
        let mut conv = MistralAdapter.stream_converter("mistral.large").unwrap();
        let first = conv
            .convert_stream_chunk(r#"{"outputs":[{"text":"Bon","stop_reason":null}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(first.delta().unwrap().content.as_deref(), Some("Bon"));

        let last = conv
            .convert_stream_chunk(
                r#"{"outputs":[{"text":"jour","stop_reason":"length"}],"amazon-bedrock-invocationMetrics":{"inputTokenCount":6,"outputTokenCount":2}}"#,
            )
            .unwrap()
            .unwrap();
        assert_eq!(last.finish_reason(), Some("length"));
        assert_eq!(last.usage, Some(ChatUsage::new(6, 2)));
    }
}
