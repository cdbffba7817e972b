use serde_json::Value;
use std::sync::Arc;

use super::canonical_types::{ChatCompletionRequest, ChatCompletionResponse};
use super::claude_request::{enforce_cache_cap, to_messages_request, ImageContext, MAX_CACHE_MARKERS};
use super::claude_response::messages_to_chat;
use super::claude_streaming::ClaudeStreamConverter;
use crate::adapter::{BackendFamily, ModelAdapter, StreamChunkConverter};
use crate::config::ClaudeConfig;
use crate::error::Result;
use crate::images::{ImageComplianceProcessor, ImageCompressor, ResolvedImages};
use crate::validation::{sanitize_request, validate_payload};

/// Adapter for Claude models behind the Messages invoke API.
pub struct ClaudeAdapter {
    config: ClaudeConfig,
    processor: ImageComplianceProcessor,
    compressor: Arc<dyn ImageCompressor>,
}

impl ClaudeAdapter {
    pub fn new(
        config: ClaudeConfig,
        processor: ImageComplianceProcessor,
        compressor: Arc<dyn ImageCompressor>,
    ) -> Self {
        Self {
            config,
            processor,
            compressor,
        }
    }
}

impl ModelAdapter for ClaudeAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Claude
    }

    fn convert_request(
        &self,
        req: &ChatCompletionRequest,
        images: &ResolvedImages,
    ) -> Result<Value> {
        let req = sanitize_request(BackendFamily::Claude, req);
        let ctx = ImageContext {
            resolved: images,
            processor: &self.processor,
            compressor: self.compressor.as_ref(),
            byte_budget: self.config.image_byte_budget,
        };

        let mut body = to_messages_request(&req, &self.config, &ctx)?;
        // Must run last, over the fully assembled document.
        enforce_cache_cap(&mut body, MAX_CACHE_MARKERS);

        let value = serde_json::to_value(&body)?;
        validate_payload(BackendFamily::Claude, &value)?;
        Ok(value)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse> {
        messages_to_chat(body, model)
    }

    fn stream_converter(&self, model: &str) -> Result<Box<dyn StreamChunkConverter>> {
        Ok(Box::new(ClaudeStreamConverter::new(model)))
    }
}
