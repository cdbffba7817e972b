//! State machine for translating Claude stream events into canonical chunks.
//!
//! [`ClaudeStreamConverter`] consumes one event line at a time. It tracks which
//! content blocks are tool calls so that argument fragments can be tagged with
//! a tool ordinal, remembers usage reported early in the stream, and makes sure
//! exactly one chunk carries the finish reason.

use std::collections::HashMap;

use super::canonical_types::{
    completion_id, ChatCompletionChunk, ChatUsage, ChunkDelta, ChunkToolCall,
    ChunkToolCallFunction, Role,
};
use super::claude_response::{map_stop_reason, usage_to_chat};
use super::claude_types::{Delta, ResponseContentBlock, StreamEvent, Usage};
use crate::adapter::{line_payload, StreamChunkConverter};
use crate::error::{BridgeError, Result};

#[derive(Debug)]
pub struct ClaudeStreamConverter {
    id: String,
    model: String,
    created: i64,
    /// Backend content-block index -> canonical tool ordinal.
    tool_ordinals: HashMap<usize, u32>,
    next_ordinal: u32,
    usage: ChatUsage,
    saw_usage: bool,
    finish_sent: bool,
}

impl ClaudeStreamConverter {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            tool_ordinals: HashMap::new(),
            next_ordinal: 0,
            usage: ChatUsage::default(),
            saw_usage: false,
            finish_sent: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta) -> ChatCompletionChunk {
        ChatCompletionChunk::new(&self.id, &self.model, self.created, delta)
    }

    fn ordinal_for(&mut self, block_index: usize) -> u32 {
        if let Some(ordinal) = self.tool_ordinals.get(&block_index) {
            return *ordinal;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.tool_ordinals.insert(block_index, ordinal);
        ordinal
    }

    fn tool_start(&mut self, block_index: usize, id: &str, name: &str) -> ChunkToolCall {
        ChunkToolCall {
            index: self.ordinal_for(block_index),
            id: Some(id.to_string()),
            call_type: Some("function".to_string()),
            function: Some(ChunkToolCallFunction {
                name: Some(name.to_string()),
                arguments: Some(String::new()),
            }),
        }
    }

    /// Fold newly reported counters into the running totals. Counters absent
    /// from `usage` keep their previous value.
    fn absorb_usage(&mut self, usage: &Usage) {
        let reported = usage_to_chat(usage);
        if let Some(input) = usage.input_tokens() {
            self.usage.prompt_tokens = input;
        }
        if let Some(output) = usage.output_tokens() {
            self.usage.completion_tokens = output;
        }
        if reported.cache_read_input_tokens.is_some() {
            self.usage.cache_read_input_tokens = reported.cache_read_input_tokens;
        }
        if reported.cache_creation_input_tokens.is_some() {
            self.usage.cache_creation_input_tokens = reported.cache_creation_input_tokens;
        }
        self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
        self.saw_usage = true;
    }

    fn current_usage(&self) -> Option<ChatUsage> {
        self.saw_usage.then(|| self.usage.clone())
    }

    fn on_event(&mut self, event: StreamEvent) -> Result<Option<ChatCompletionChunk>> {
        match event {
            StreamEvent::MessageStart { message } => {
                if !message.id.is_empty() {
                    self.id = message.id.clone();
                }
                if let Some(usage) = &message.usage {
                    self.absorb_usage(usage);
                }

                let placeholders: Vec<ChunkToolCall> = message
                    .content
                    .iter()
                    .enumerate()
                    .filter_map(|(i, block)| match block {
                        ResponseContentBlock::ToolUse { id, name, .. } => Some((i, id, name)),
                        _ => None,
                    })
                    .map(|(i, id, name)| self.tool_start(i, id, name))
                    .collect();

                Ok(Some(self.chunk(ChunkDelta {
                    role: Some(Role::Assistant),
                    content: None,
                    tool_calls: (!placeholders.is_empty()).then_some(placeholders),
                })))
            }

            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ResponseContentBlock::ToolUse { id, name, .. } => {
                    let call = self.tool_start(index, &id, &name);
                    Ok(Some(self.chunk(ChunkDelta {
                        tool_calls: Some(vec![call]),
                        ..ChunkDelta::default()
                    })))
                }
                ResponseContentBlock::Text { text } if !text.is_empty() => {
                    Ok(Some(self.chunk(ChunkDelta {
                        content: Some(text),
                        ..ChunkDelta::default()
                    })))
                }
                _ => Ok(None),
            },

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => Ok(Some(self.chunk(ChunkDelta {
                    content: Some(text),
                    ..ChunkDelta::default()
                }))),
                Delta::InputJsonDelta { partial_json } => {
                    let call = ChunkToolCall {
                        index: self.ordinal_for(index),
                        id: None,
                        call_type: None,
                        function: Some(ChunkToolCallFunction {
                            name: None,
                            arguments: Some(partial_json),
                        }),
                    };
                    Ok(Some(self.chunk(ChunkDelta {
                        tool_calls: Some(vec![call]),
                        ..ChunkDelta::default()
                    })))
                }
                Delta::Other => Ok(None),
            },

            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => Ok(None),

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = &usage {
                    self.absorb_usage(usage);
                }
                match delta.stop_reason {
                    Some(reason) if !self.finish_sent => {
                        self.finish_sent = true;
                        Ok(Some(
                            self.chunk(ChunkDelta::default())
                                .with_finish_reason(Some(map_stop_reason(&reason)))
                                .with_usage(self.current_usage()),
                        ))
                    }
                    _ => Ok(None),
                }
            }

            StreamEvent::MessageStop { invocation_metrics } => {
                if let Some(metrics) = &invocation_metrics {
                    self.absorb_usage(metrics);
                }
                let finish = if self.finish_sent {
                    None
                } else {
                    self.finish_sent = true;
                    Some("stop".to_string())
                };
                Ok(Some(
                    self.chunk(ChunkDelta::default())
                        .with_finish_reason(finish)
                        .with_usage(self.current_usage()),
                ))
            }

            StreamEvent::Error { error } => Err(BridgeError::backend(format!(
                "{}: {}",
                error.error_type, error.message
            ))),

            StreamEvent::Unknown => {
                tracing::debug!("Skipping unknown stream event");
                Ok(None)
            }
        }
    }
}

impl StreamChunkConverter for ClaudeStreamConverter {
    fn convert_stream_chunk(&mut self, line: &str) -> Result<Option<ChatCompletionChunk>> {
        let Some(payload) = line_payload(line) else {
            return Ok(None);
        };
        let event: StreamEvent = serde_json::from_str(payload)
            .map_err(|e| BridgeError::stream_parse(e.to_string(), line))?;
        tracing::trace!(event = event.event_name(), "Claude stream event");
        self.on_event(event)
    }
}
