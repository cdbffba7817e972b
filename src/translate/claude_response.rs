use serde_json::Value;

use super::canonical_types::{
    completion_id, ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage,
    ChoiceMessage, Role,
};
use super::claude_types::{MessagesResponse, ResponseContentBlock, Usage};
use crate::error::{BridgeError, Result};

/// Translate a Claude Messages response body into a canonical chat completion.
///
/// # Errors
/// Returns `BridgeError::Backend` for an error body and
/// `BridgeError::Conversion` when the body does not have the Messages shape.
pub fn messages_to_chat(body: &Value, model: &str) -> Result<ChatCompletionResponse> {
    if body.get("type").and_then(Value::as_str) == Some("error") {
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(BridgeError::backend(message));
    }

    let resp: MessagesResponse = serde_json::from_value(body.clone())
        .map_err(|e| BridgeError::conversion(format!("Unexpected Claude response shape: {e}")))?;

    let mut text = String::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            ResponseContentBlock::Text { text: t } => text.push_str(t),
            ResponseContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    serde_json::to_string(input)?
                };
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments,
                    },
                });
            }
            ResponseContentBlock::Unknown => {
                tracing::debug!("Skipping unrecognized content block");
            }
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    let message = ChoiceMessage {
        role: Role::Assistant,
        content,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    };

    let id = if resp.id.is_empty() {
        completion_id()
    } else {
        resp.id.clone()
    };

    Ok(ChatCompletionResponse::single(
        id,
        model,
        message,
        resp.stop_reason.as_deref().map(map_stop_reason),
        resp.usage.as_ref().map(usage_to_chat),
    ))
}

/// Map a Claude stop reason to a canonical finish reason.
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    }
}

pub fn usage_to_chat(usage: &Usage) -> ChatUsage {
    ChatUsage {
        cache_read_input_tokens: usage.cache_read_tokens(),
        cache_creation_input_tokens: usage.cache_creation_tokens(),
        ..ChatUsage::new(
            usage.input_tokens().unwrap_or(0),
            usage.output_tokens().unwrap_or(0),
        )
    }
}
