use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::canonical_types::{
    completion_id, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatUsage,
    ChoiceMessage, Role,
};
use super::claude_types::Usage;
use super::prompt::{flatten_turns, llama_template};
use super::text_stream::TextStreamState;
use crate::adapter::{line_payload, BackendFamily, ModelAdapter, StreamChunkConverter};
use crate::error::{BridgeError, Result};
use crate::images::ResolvedImages;
use crate::validation::{sanitize_request, validate_payload};

#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaAdapter;

#[derive(Debug, Serialize)]
struct LlamaRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_gen_len: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

/// Both the complete response and each stream object.
#[derive(Debug, Deserialize)]
struct LlamaGeneration {
    #[serde(default)]
    generation: String,
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    generation_token_count: Option<u64>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(rename = "amazon-bedrock-invocationMetrics", default)]
    invocation_metrics: Option<Usage>,
}

impl ModelAdapter for LlamaAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Llama
    }

    fn convert_request(
        &self,
        req: &ChatCompletionRequest,
        _images: &ResolvedImages,
    ) -> Result<Value> {
        let req = sanitize_request(BackendFamily::Llama, req);
        let body = LlamaRequest {
            prompt: llama_template(&flatten_turns(BackendFamily::Llama, &req.messages)),
            max_gen_len: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
        };
        let value = serde_json::to_value(body)?;
        validate_payload(BackendFamily::Llama, &value)?;
        Ok(value)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse> {
        let resp: LlamaGeneration = serde_json::from_value(body.clone())
            .map_err(|e| BridgeError::conversion(format!("Unexpected Llama response shape: {e}")))?;

        let usage = match (resp.prompt_token_count, resp.generation_token_count) {
            (None, None) => None,
            (p, g) => Some(ChatUsage::new(p.unwrap_or(0), g.unwrap_or(0))),
        };

        Ok(ChatCompletionResponse::single(
            completion_id(),
            model,
            ChoiceMessage {
                role: Role::Assistant,
                content: Some(resp.generation),
                tool_calls: None,
            },
            resp.stop_reason,
            usage,
        ))
    }

    fn stream_converter(&self, model: &str) -> Result<Box<dyn StreamChunkConverter>> {
        Ok(Box::new(LlamaStreamConverter {
            state: TextStreamState::new(model),
            prompt_tokens: None,
            completion_tokens: None,
        }))
    }
}

struct LlamaStreamConverter {
    state: TextStreamState,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

impl StreamChunkConverter for LlamaStreamConverter {
    fn convert_stream_chunk(&mut self, line: &str) -> Result<Option<ChatCompletionChunk>> {
        let Some(payload) = line_payload(line) else {
            return Ok(None);
        };
        let piece: LlamaGeneration = serde_json::from_str(payload)
            .map_err(|e| BridgeError::stream_parse(e.to_string(), line))?;

        self.prompt_tokens = piece.prompt_token_count.or(self.prompt_tokens);
        self.completion_tokens = piece.generation_token_count.or(self.completion_tokens);

        // Usage rides on the terminal chunk only.
        let usage = if piece.stop_reason.is_some() || piece.invocation_metrics.is_some() {
            match &piece.invocation_metrics {
                Some(metrics) => Some(ChatUsage::new(
                    metrics.input_tokens().or(self.prompt_tokens).unwrap_or(0),
                    metrics.output_tokens().or(self.completion_tokens).unwrap_or(0),
                )),
                None => self
                    .prompt_tokens
                    .or(self.completion_tokens)
                    .map(|_| {
                        ChatUsage::new(
                            self.prompt_tokens.unwrap_or(0),
                            self.completion_tokens.unwrap_or(0),
                        )
                    }),
            }
        } else {
            None
        };

        Ok(self.state.emit(Some(piece.generation), piece.stop_reason, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical_types::ChatMessage;
    use serde_json::json;

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "meta.llama3-8b-instruct-v1:0".to_string(),
            messages: vec![ChatMessage::system("Be kind."), ChatMessage::user("Hello")],
            max_tokens: Some(256),
            temperature: Some(0.2),
            top_k: Some(40),
            ..ChatCompletionRequest::default()
        }
    }

    #[test]
    fn test_request_shape() {
        let body = LlamaAdapter
            .convert_request(&request(), &ResolvedImages::new())
            .unwrap();
        assert_eq!(body["max_gen_len"], 256);
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("top_k").is_none());
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.contains("Be kind."));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn test_max_tokens_over_limit_dropped() {
        let mut req = request();
        req.max_tokens = Some(4096);
        let body = LlamaAdapter.convert_request(&req, &ResolvedImages::new()).unwrap();
        assert!(body.get("max_gen_len").is_none());
    }

    #[test]
    fn test_response() {
        let body = json!({
            "generation": "Hi there",
            "prompt_token_count": 9,
            "generation_token_count": 3,
            "stop_reason": "stop"
        });
        let resp = LlamaAdapter.convert_response(&body, "meta.llama3").unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hi there"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage, Some(ChatUsage::new(9, 3)));
    }

    #[test]
    fn test_stream() {
        let mut conv = LlamaAdapter.stream_converter("meta.llama3").unwrap();
        let first = conv
            .convert_stream_chunk(r#"{"generation":"Hel","prompt_token_count":9,"generation_token_count":1,"stop_reason":null}"#)
            .unwrap()
            .unwrap();
        assert_eq!(first.delta().unwrap().role, Some(Role::Assistant));
        assert_eq!(first.delta().unwrap().content.as_deref(), Some("Hel"));
        assert!(first.usage.is_none());

        let last = conv
            .convert_stream_chunk(r#"{"generation":"lo","prompt_token_count":null,"generation_token_count":2,"stop_reason":"length"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(last.delta().unwrap().content.as_deref(), Some("lo"));
        assert_eq!(last.finish_reason(), Some("length"));
        assert_eq!(last.usage, Some(ChatUsage::new(9, 2)));
    }

    #[test]
    fn test_stream_bad_line() {
        let mut conv = LlamaAdapter.stream_converter("m").unwrap();
        assert!(matches!(
            conv.convert_stream_chunk("generation: nope"),
            Err(BridgeError::StreamParse { .. })
        ));
    }
}
