//! Translate canonical chat requests into Claude Messages invoke bodies.
//!
//! Handles the system prompt, tool results, assistant tool calls, images and
//! tool choice. The backend has no `tool` role and requires alternating roles,
//! so tool results ride on user turns and same-role neighbours are merged.

use serde_json::Value;

use super::canonical_types::{
    CacheControl, ChatCompletionRequest, ChatContent, ChatMessage, ChatTool, ChatToolChoice,
    ContentPart, Role as ChatRole,
};
use super::claude_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, SystemBlock,
    SystemContent, Tool, ToolChoice,
};
use crate::config::ClaudeConfig;
use crate::error::{BridgeError, Result};
use crate::images::{
    is_remote_url, ImageComplianceProcessor, ImageCompressor, InlineImage, ResolvedImages,
};

/// Most cache breakpoints the backend accepts in one request.
pub const MAX_CACHE_MARKERS: usize = 4;

/// Everything image conversion needs besides the part itself.
pub struct ImageContext<'a> {
    pub resolved: &'a ResolvedImages,
    pub processor: &'a ImageComplianceProcessor,
    pub compressor: &'a dyn ImageCompressor,
    pub byte_budget: usize,
}

/// Build the Messages body for an already sanitized request.
///
/// # Errors
/// Returns `BridgeError::Validation` when no conversational message survives
/// conversion.
pub fn to_messages_request(
    req: &ChatCompletionRequest,
    config: &ClaudeConfig,
    images: &ImageContext<'_>,
) -> Result<MessagesRequest> {
    let system = build_system(&req.messages, req.cache_system.unwrap_or(false));

    let mut turns: Vec<(Role, Vec<ContentBlock>)> = Vec::new();
    for msg in &req.messages {
        let (role, blocks) = match msg.role {
            ChatRole::System => continue,
            ChatRole::User => (Role::User, user_blocks(msg, images)),
            ChatRole::Tool => (Role::User, vec![tool_result_block(msg)]),
            ChatRole::Assistant => (Role::Assistant, assistant_blocks(msg)),
        };
        if blocks.is_empty() {
            tracing::debug!(role = ?msg.role, "Skipping message with no content");
            continue;
        }
        push_turn(&mut turns, role, blocks);
    }

    if turns.is_empty() {
        return Err(BridgeError::validation(
            "Request has no user or assistant content to send",
        ));
    }

    let messages = turns
        .into_iter()
        .map(|(role, blocks)| Message {
            role,
            content: MessageContent::Blocks(blocks),
        })
        .collect();

    let tools: Option<Vec<Tool>> = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect());

    let tool_choice = match (&tools, &req.tool_choice) {
        (Some(_), Some(choice)) => Some(normalize_tool_choice(choice)),
        (None, Some(_)) => {
            tracing::debug!("Dropping tool_choice because no tools were sent");
            None
        }
        _ => None,
    };

    let stop_sequences = req
        .stop
        .as_ref()
        .map(|s| s.to_vec())
        .filter(|s| !s.is_empty());

    let anthropic_beta = if config.betas.is_empty() {
        None
    } else {
        Some(config.betas.clone())
    };

    Ok(MessagesRequest {
        anthropic_version: config.anthropic_version.clone(),
        max_tokens: req.max_tokens.unwrap_or(config.default_max_tokens),
        messages,
        system,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences,
        tools,
        tool_choice,
        anthropic_beta,
    })
}

fn build_system(messages: &[ChatMessage], cache: bool) -> Option<SystemContent> {
    let text = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(ChatMessage::text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if text.is_empty() {
        return None;
    }

    if cache {
        Some(SystemContent::Blocks(vec![SystemBlock::Text {
            text,
            cache_control: Some(CacheControl::ephemeral()),
        }]))
    } else {
        Some(SystemContent::Text(text))
    }
}

fn push_turn(turns: &mut Vec<(Role, Vec<ContentBlock>)>, role: Role, mut blocks: Vec<ContentBlock>) {
    match turns.last_mut() {
        Some((last_role, last_blocks)) if *last_role == role => last_blocks.append(&mut blocks),
        _ => turns.push((role, blocks)),
    }
}

fn user_blocks(msg: &ChatMessage, images: &ImageContext<'_>) -> Vec<ContentBlock> {
    match &msg.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => text_block(text, None).into_iter().collect(),
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text {
                    text,
                    cache_control,
                } => text_block(text, cache_control.clone()),
                ContentPart::ImageUrl {
                    image_url,
                    cache_control,
                } => Some(image_block(&image_url.url, cache_control.clone(), images)),
            })
            .collect(),
    }
}

fn text_block(text: &str, cache_control: Option<CacheControl>) -> Option<ContentBlock> {
    if text.is_empty() {
        return None;
    }
    Some(ContentBlock::Text {
        text: text.to_string(),
        cache_control,
    })
}

fn image_block(
    url: &str,
    cache_control: Option<CacheControl>,
    images: &ImageContext<'_>,
) -> ContentBlock {
    let inline = if is_remote_url(url) {
        images.resolved.get(url).cloned()
    } else {
        InlineImage::from_data_url(url)
    };

    let Some(inline) = inline else {
        tracing::warn!(url = %preview(url), "Image unavailable, substituting a note");
        return ContentBlock::Text {
            text: format!("[Image at {} could not be retrieved]", preview(url)),
            cache_control,
        };
    };

    let compliant = images.processor.process_inline(&inline);
    let compressed = images.compressor.compress(&compliant, images.byte_budget);

    ContentBlock::Image {
        source: ImageSource {
            source_type: "base64".to_string(),
            media_type: compressed.media_type,
            data: compressed.data,
        },
        cache_control,
    }
}

// data: URLs can be megabytes long
fn preview(url: &str) -> String {
    if url.starts_with("data:") {
        format!("{}...", crate::error::truncate(url, 48))
    } else {
        url.to_string()
    }
}

fn tool_result_block(msg: &ChatMessage) -> ContentBlock {
    let tool_use_id = msg.tool_call_id.clone().unwrap_or_else(|| {
        tracing::warn!("Tool message without tool_call_id");
        String::new()
    });

    if msg.content.as_ref().is_some_and(ChatContent::has_images) {
        tracing::info!(tool_use_id = %tool_use_id, "Dropping image parts from tool result");
    }

    // Marked parts stay separate blocks so each keeps its own marker.
    let content = match &msg.content {
        Some(ChatContent::Parts(parts)) if has_marked_text(parts) => {
            MessageContent::Blocks(text_part_blocks(parts))
        }
        _ => MessageContent::Text(msg.text()),
    };

    ContentBlock::ToolResult {
        tool_use_id,
        content: Some(content),
        is_error: None,
        cache_control: None,
    }
}

fn has_marked_text(parts: &[ContentPart]) -> bool {
    parts.iter().any(|p| {
        matches!(
            p,
            ContentPart::Text {
                cache_control: Some(_),
                ..
            }
        )
    })
}

fn text_part_blocks(parts: &[ContentPart]) -> Vec<ContentBlock> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text {
                text,
                cache_control,
            } => text_block(text, cache_control.clone()),
            ContentPart::ImageUrl { .. } => None,
        })
        .collect()
}

fn assistant_blocks(msg: &ChatMessage) -> Vec<ContentBlock> {
    if msg.content.as_ref().is_some_and(ChatContent::has_images) {
        tracing::info!("Dropping image parts from assistant message");
    }

    let mut blocks: Vec<ContentBlock> = match &msg.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => text_block(text, None).into_iter().collect(),
        Some(ChatContent::Parts(parts)) => text_part_blocks(parts),
    };

    for call in msg.tool_calls.iter().flatten() {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_arguments(&call.function.name, &call.function.arguments),
        });
    }

    blocks
}

/// Tool arguments as a JSON object; anything else becomes `{}`.
pub fn parse_arguments(tool: &str, arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            tracing::warn!(tool = %tool, "Tool arguments are not a JSON object, using {{}}");
            Value::Object(serde_json::Map::new())
        }
        Err(e) => {
            tracing::warn!(tool = %tool, error = %e, "Invalid tool arguments JSON, using {{}}");
            Value::Object(serde_json::Map::new())
        }
    }
}

fn translate_tool(tool: &ChatTool) -> Tool {
    let input_schema = if tool.function.parameters.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        tool.function.parameters.clone()
    };

    Tool {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema,
    }
}

/// Reduce any accepted tool-choice shape to one of the backend's choice kinds.
pub fn normalize_tool_choice(choice: &ChatToolChoice) -> ToolChoice {
    match choice {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => ToolChoice::Auto,
            "none" => ToolChoice::None,
            "required" | "any" => ToolChoice::Any,
            "" => {
                tracing::warn!("Empty tool_choice, falling back to auto");
                ToolChoice::Auto
            }
            name => ToolChoice::Tool {
                name: name.to_string(),
            },
        },
        ChatToolChoice::Function(specific) if !specific.function.name.is_empty() => {
            ToolChoice::Tool {
                name: specific.function.name.clone(),
            }
        }
        ChatToolChoice::Function(_) => {
            tracing::warn!("tool_choice names no function, falling back to auto");
            ToolChoice::Auto
        }
        ChatToolChoice::Other(value) => {
            serde_json::from_value::<ToolChoice>(value.clone()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, choice = %value, "Malformed tool_choice, falling back to auto");
                ToolChoice::Auto
            })
        }
    }
}

fn cache_slots(req: &mut MessagesRequest) -> Vec<&mut Option<CacheControl>> {
    let mut slots = Vec::new();

    if let Some(SystemContent::Blocks(blocks)) = &mut req.system {
        for block in blocks.iter_mut() {
            match block {
                SystemBlock::Text { cache_control, .. } => slots.push(cache_control),
            }
        }
    }

    for msg in &mut req.messages {
        if let MessageContent::Blocks(blocks) = &mut msg.content {
            block_slots(blocks, &mut slots);
        }
    }

    slots
}

fn block_slots<'a>(blocks: &'a mut [ContentBlock], slots: &mut Vec<&'a mut Option<CacheControl>>) {
    for block in blocks.iter_mut() {
        match block {
            ContentBlock::Text { cache_control, .. } | ContentBlock::Image { cache_control, .. } => {
                slots.push(cache_control);
            }
            ContentBlock::ToolResult {
                content,
                cache_control,
                ..
            } => {
                slots.push(cache_control);
                if let Some(MessageContent::Blocks(nested)) = content {
                    block_slots(nested, slots);
                }
            }
            ContentBlock::ToolUse { .. } => {}
        }
    }
}

pub fn count_cache_markers(req: &mut MessagesRequest) -> usize {
    cache_slots(req).iter().filter(|s| s.is_some()).count()
}

/// Strip cache markers in document order until at most `max` remain.
/// Returns how many were removed.
pub fn enforce_cache_cap(req: &mut MessagesRequest, max: usize) -> usize {
    let mut marked: Vec<&mut Option<CacheControl>> =
        cache_slots(req).into_iter().filter(|s| s.is_some()).collect();

    let excess = marked.len().saturating_sub(max);
    for slot in marked.iter_mut().take(excess) {
        **slot = None;
    }

    if excess > 0 {
        tracing::warn!(removed = excess, limit = max, "Too many cache markers, removed the earliest");
    }
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::JpegBudgetCompressor;
    use crate::translate::canonical_types::{
        ChatFunction, ChatToolCall, ChatToolCallFunction, ChatToolChoiceFunction,
        ChatToolChoiceSpecific, ImageUrlDetail,
    };
    use serde_json::json;

    struct Fixture {
        resolved: ResolvedImages,
        processor: ImageComplianceProcessor,
        compressor: JpegBudgetCompressor,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                resolved: ResolvedImages::new(),
                processor: ImageComplianceProcessor::new(8000),
                compressor: JpegBudgetCompressor::default(),
            }
        }

        fn ctx(&self) -> ImageContext<'_> {
            ImageContext {
                resolved: &self.resolved,
                processor: &self.processor,
                compressor: &self.compressor,
                byte_budget: 3_750_000,
            }
        }
    }

    fn convert(req: &ChatCompletionRequest) -> MessagesRequest {
        let fx = Fixture::new();
        to_messages_request(req, &ClaudeConfig::default(), &fx.ctx()).unwrap()
    }

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "anthropic.claude-3-5-sonnet".to_string(),
            messages,
            ..ChatCompletionRequest::default()
        }
    }

    fn cached_text(text: &str) -> ContentPart {
        ContentPart::Text {
            text: text.to_string(),
            cache_control: Some(CacheControl::ephemeral()),
        }
    }

    #[test]
    fn test_system_messages_concatenated() {
        let req = request(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
            ChatMessage::system("Use English."),
        ]);
        let out = convert(&req);
        match out.system {
            Some(SystemContent::Text(text)) => assert_eq!(text, "Be brief.\n\nUse English."),
            other => panic!("expected plain system text, got {other:?}"),
        }
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.anthropic_version, "bedrock-2023-05-31");
        assert_eq!(out.max_tokens, 4096);
    }

    #[test]
    fn test_system_cache_hint_produces_marked_block() {
        let mut req = request(vec![ChatMessage::system("rules"), ChatMessage::user("hi")]);
        req.cache_system = Some(true);
        let value = serde_json::to_value(convert(&req)).unwrap();
        assert_eq!(
            value["system"],
            json!([{"type": "text", "text": "rules", "cache_control": {"type": "ephemeral"}}])
        );
    }

    #[test]
    fn test_tool_message_becomes_user_tool_result() {
        let req = request(vec![
            ChatMessage::user("weather?"),
            ChatMessage {
                role: ChatRole::Assistant,
                tool_calls: Some(vec![ChatToolCall {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: "get_weather".to_string(),
                        arguments: r#"{"city":"Paris"}"#.to_string(),
                    },
                }]),
                ..ChatMessage::default()
            },
            ChatMessage::tool_result("call_1", "sunny"),
            ChatMessage::user("thanks"),
        ]);
        let value = serde_json::to_value(convert(&req)).unwrap();
        let messages = value["messages"].as_array().unwrap();

        // tool result and following user turn merge into one user message
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["input"], json!({"city": "Paris"}));
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");
        assert_eq!(messages[2]["content"][0]["content"], "sunny");
        assert_eq!(messages[2]["content"][1]["text"], "thanks");
    }

    #[test]
    fn test_assistant_text_precedes_tool_use() {
        let msg = ChatMessage {
            role: ChatRole::Assistant,
            content: Some(ChatContent::Text("Let me look.".to_string())),
            tool_calls: Some(vec![ChatToolCall {
                id: "call_9".to_string(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: "search".to_string(),
                    arguments: "not json".to_string(),
                },
            }]),
            ..ChatMessage::default()
        };
        let blocks = assistant_blocks(&msg);
        assert!(matches!(&blocks[0], ContentBlock::Text { text, .. } if text == "Let me look."));
        match &blocks[1] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input, &json!({})),
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn test_assistant_parts_keep_their_cache_markers() {
        let req = request(vec![
            ChatMessage::user("read this"),
            ChatMessage {
                role: ChatRole::Assistant,
                content: Some(ChatContent::Parts(vec![
                    cached_text("long context"),
                    ContentPart::Text {
                        text: "plain".to_string(),
                        cache_control: None,
                    },
                ])),
                ..ChatMessage::default()
            },
            ChatMessage::user("and now?"),
        ]);
        let mut out = convert(&req);
        assert_eq!(count_cache_markers(&mut out), 1);

        let value = serde_json::to_value(&out).unwrap();
        let assistant = &value["messages"][1]["content"];
        assert_eq!(assistant[0]["text"], "long context");
        assert_eq!(assistant[0]["cache_control"], json!({"type": "ephemeral"}));
        assert_eq!(assistant[1]["text"], "plain");
        assert!(assistant[1].get("cache_control").is_none());
    }

    #[test]
    fn test_tool_result_keeps_every_part_marker() {
        let req = request(vec![
            ChatMessage::user("go"),
            ChatMessage {
                role: ChatRole::Tool,
                tool_call_id: Some("call_1".to_string()),
                content: Some(ChatContent::Parts(vec![
                    cached_text("page one"),
                    cached_text("page two"),
                    ContentPart::ImageUrl {
                        image_url: ImageUrlDetail {
                            url: "https://example.com/chart.png".to_string(),
                            detail: None,
                        },
                        cache_control: None,
                    },
                ])),
                ..ChatMessage::default()
            },
        ]);
        let mut out = convert(&req);
        assert_eq!(count_cache_markers(&mut out), 2);

        let value = serde_json::to_value(&out).unwrap();
        let result = &value["messages"][0]["content"][1];
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["content"].as_array().unwrap().len(), 2);
        assert_eq!(result["content"][1]["text"], "page two");
        assert_eq!(result["content"][1]["cache_control"], json!({"type": "ephemeral"}));
    }

    #[test]
    fn test_cache_cap_reaches_into_tool_results() {
        let req = request(vec![
            ChatMessage {
                role: ChatRole::User,
                content: Some(ChatContent::Parts(vec![cached_text("a"), cached_text("b")])),
                ..ChatMessage::default()
            },
            ChatMessage {
                role: ChatRole::Tool,
                tool_call_id: Some("call_1".to_string()),
                content: Some(ChatContent::Parts(vec![
                    cached_text("c"),
                    cached_text("d"),
                    cached_text("e"),
                ])),
                ..ChatMessage::default()
            },
        ]);
        let mut out = convert(&req);
        assert_eq!(enforce_cache_cap(&mut out, MAX_CACHE_MARKERS), 1);
        assert_eq!(count_cache_markers(&mut out), 4);

        let value = serde_json::to_value(&out).unwrap();
        assert!(value["messages"][0]["content"][0].get("cache_control").is_none());
        assert!(value["messages"][0]["content"][2]["content"][2]
            .get("cache_control")
            .is_some());
    }

    #[test]
    fn test_padding_only_data_url_does_not_panic() {
        let req = request(vec![ChatMessage {
            role: ChatRole::User,
            content: Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: "data:image/png;base64,=".to_string(),
                    detail: None,
                },
                cache_control: None,
            }])),
            ..ChatMessage::default()
        }]);
        let value = serde_json::to_value(convert(&req)).unwrap();
        assert_eq!(value["messages"][0]["content"][0]["type"], "image");
        assert_eq!(value["messages"][0]["content"][0]["source"]["data"], "=");
    }

    #[test]
    fn test_parse_arguments_non_object_is_empty() {
        assert_eq!(parse_arguments("t", "[1,2]"), json!({}));
        assert_eq!(parse_arguments("t", ""), json!({}));
        assert_eq!(parse_arguments("t", r#"{"a":1}"#), json!({"a": 1}));
    }

    #[test]
    fn test_tool_choice_shapes() {
        let mode = |m: &str| normalize_tool_choice(&ChatToolChoice::Mode(m.to_string()));
        assert_eq!(mode("auto"), ToolChoice::Auto);
        assert_eq!(mode("none"), ToolChoice::None);
        assert_eq!(mode("required"), ToolChoice::Any);
        assert_eq!(
            mode("get_weather"),
            ToolChoice::Tool {
                name: "get_weather".to_string()
            }
        );

        let func = ChatToolChoice::Function(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction {
                name: "search".to_string(),
            },
        });
        assert_eq!(
            normalize_tool_choice(&func),
            ToolChoice::Tool {
                name: "search".to_string()
            }
        );

        let untyped: ChatToolChoice =
            serde_json::from_value(json!({"function": {"name": "search"}})).unwrap();
        assert_eq!(
            normalize_tool_choice(&untyped),
            ToolChoice::Tool {
                name: "search".to_string()
            }
        );

        let native = ChatToolChoice::Other(json!({"type": "any"}));
        assert_eq!(normalize_tool_choice(&native), ToolChoice::Any);

        let malformed = ChatToolChoice::Other(json!({"kind": 7}));
        assert_eq!(normalize_tool_choice(&malformed), ToolChoice::Auto);
    }

    #[test]
    fn test_tool_choice_omitted_without_tools() {
        let mut req = request(vec![ChatMessage::user("hi")]);
        req.tool_choice = Some(ChatToolChoice::Mode("required".to_string()));
        assert!(convert(&req).tool_choice.is_none());

        req.tools = Some(vec![ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: "search".to_string(),
                description: None,
                parameters: Value::Null,
            },
        }]);
        let out = convert(&req);
        assert_eq!(out.tool_choice, Some(ToolChoice::Any));
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    #[test]
    fn test_missing_remote_image_degrades_to_text() {
        let req = request(vec![ChatMessage {
            role: ChatRole::User,
            content: Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: "https://example.com/cat.png".to_string(),
                    detail: None,
                },
                cache_control: None,
            }])),
            ..ChatMessage::default()
        }]);
        let value = serde_json::to_value(convert(&req)).unwrap();
        let block = &value["messages"][0]["content"][0];
        assert_eq!(block["type"], "text");
        assert!(block["text"].as_str().unwrap().contains("could not be retrieved"));
    }

    #[test]
    fn test_resolved_remote_image_becomes_base64_block() {
        let mut fx = Fixture::new();
        fx.resolved.insert(
            "https://example.com/cat.png".to_string(),
            InlineImage::new("image/png", "AAAA"),
        );
        let req = request(vec![ChatMessage {
            role: ChatRole::User,
            content: Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: "https://example.com/cat.png".to_string(),
                    detail: None,
                },
                cache_control: None,
            }])),
            ..ChatMessage::default()
        }]);
        let out = to_messages_request(&req, &ClaudeConfig::default(), &fx.ctx()).unwrap();
        let value = serde_json::to_value(out).unwrap();
        assert_eq!(
            value["messages"][0]["content"][0]["source"],
            json!({"type": "base64", "media_type": "image/png", "data": "AAAA"})
        );
    }

    #[test]
    fn test_cache_cap_keeps_latest_four() {
        let mut req = request(vec![
            ChatMessage::system("sys"),
            ChatMessage {
                role: ChatRole::User,
                content: Some(ChatContent::Parts(vec![
                    cached_text("a"),
                    cached_text("b"),
                    cached_text("c"),
                ])),
                ..ChatMessage::default()
            },
            ChatMessage::assistant("ok"),
            ChatMessage {
                role: ChatRole::User,
                content: Some(ChatContent::Parts(vec![cached_text("d"), cached_text("e")])),
                ..ChatMessage::default()
            },
        ]);
        req.cache_system = Some(true);
        let mut out = convert(&req);
        assert_eq!(count_cache_markers(&mut out), 6);

        assert_eq!(enforce_cache_cap(&mut out, MAX_CACHE_MARKERS), 2);
        assert_eq!(count_cache_markers(&mut out), 4);

        // system marker and "a" were the earliest
        let value = serde_json::to_value(&out).unwrap();
        assert!(value["system"][0].get("cache_control").is_none());
        assert!(value["messages"][0]["content"][0].get("cache_control").is_none());
        assert!(value["messages"][0]["content"][1].get("cache_control").is_some());
        assert!(value["messages"][2]["content"][1].get("cache_control").is_some());
    }

    #[test]
    fn test_cache_cap_noop_under_limit() {
        let req = request(vec![ChatMessage {
            role: ChatRole::User,
            content: Some(ChatContent::Parts(vec![cached_text("a"), cached_text("b")])),
            ..ChatMessage::default()
        }]);
        let mut out = convert(&req);
        assert_eq!(enforce_cache_cap(&mut out, MAX_CACHE_MARKERS), 0);
        assert_eq!(count_cache_markers(&mut out), 2);
    }

    #[test]
    fn test_only_system_is_validation_error() {
        let fx = Fixture::new();
        let req = request(vec![ChatMessage::system("alone")]);
        let err = to_messages_request(&req, &ClaudeConfig::default(), &fx.ctx()).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
    }

    #[test]
    fn test_betas_emitted_when_configured() {
        let fx = Fixture::new();
        let config = ClaudeConfig {
            betas: vec!["prompt-caching-2024-07-31".to_string()],
            ..ClaudeConfig::default()
        };
        let req = request(vec![ChatMessage::user("hi")]);
        let out = to_messages_request(&req, &config, &fx.ctx()).unwrap();
        assert_eq!(
            out.anthropic_beta,
            Some(vec!["prompt-caching-2024-07-31".to_string()])
        );
        assert!(convert(&req).anthropic_beta.is_none());
    }
}
