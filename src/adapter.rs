//! The capability interface every backend family implements.

use serde_json::Value;
use std::fmt;

use crate::error::{BridgeError, Result};
use crate::factory::FamilyPreset;
use crate::images::ResolvedImages;
use crate::translate::canonical_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFamily {
    Claude,
    Llama,
    Mistral,
    Titan,
    Ai21,
}

impl BackendFamily {
    pub fn name(self) -> &'static str {
        match self {
            BackendFamily::Claude => "claude",
            BackendFamily::Llama => "llama",
            BackendFamily::Mistral => "mistral",
            BackendFamily::Titan => "titan",
            BackendFamily::Ai21 => "ai21",
        }
    }

    pub fn supports_streaming(self) -> bool {
        !matches!(self, BackendFamily::Titan | BackendFamily::Ai21)
    }

    /// Whether image parts survive conversion for this family.
    pub fn accepts_images(self) -> bool {
        self == BackendFamily::Claude
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts between the canonical format and one backend family's wire format.
///
/// Conversions are pure: the only input besides the request is the table of
/// images resolved ahead of time (see [`crate::images::ImageFetcher`]).
pub trait ModelAdapter: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// True when the factory would route `model` to this adapter.
    fn supports(&self, model: &str) -> bool {
        FamilyPreset::for_model(model).is_some_and(|p| p.family == self.family())
    }

    fn convert_request(&self, req: &ChatCompletionRequest, images: &ResolvedImages)
        -> Result<Value>;

    /// Body for a streaming invocation. Families without incremental delivery
    /// refuse instead of silently degrading.
    fn convert_stream_request(
        &self,
        req: &ChatCompletionRequest,
        images: &ResolvedImages,
    ) -> Result<Value> {
        if !self.family().supports_streaming() {
            return Err(BridgeError::unsupported(self.family().name(), "streaming"));
        }
        self.convert_request(req, images)
    }

    fn convert_response(&self, body: &Value, model: &str) -> Result<ChatCompletionResponse>;

    /// Per-stream converter holding whatever state the family's event grammar
    /// needs. One converter serves exactly one stream.
    fn stream_converter(&self, model: &str) -> Result<Box<dyn StreamChunkConverter>>;
}

/// Turns one reconstructed stream line into at most one canonical chunk.
pub trait StreamChunkConverter: Send {
    /// `Ok(None)` for lines that carry nothing for the caller (pings, block
    /// stops, keep-alives).
    fn convert_stream_chunk(&mut self, line: &str) -> Result<Option<ChatCompletionChunk>>;
}

/// JSON payload of a stream line, tolerating an SSE `data:` prefix. `None` for
/// SSE framing lines and end-of-stream markers.
pub(crate) fn line_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return None;
    }
    let data = line
        .strip_prefix("data:")
        .map_or(line, str::trim_start);
    if data == "[DONE]" || data.is_empty() {
        return None;
    }
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_capability_by_family() {
        assert!(BackendFamily::Claude.supports_streaming());
        assert!(BackendFamily::Llama.supports_streaming());
        assert!(BackendFamily::Mistral.supports_streaming());
        assert!(!BackendFamily::Titan.supports_streaming());
        assert!(!BackendFamily::Ai21.supports_streaming());
    }

    #[test]
    fn test_line_payload() {
        assert_eq!(line_payload(r#"{"type":"ping"}"#), Some(r#"{"type":"ping"}"#));
        assert_eq!(line_payload(r#"data: {"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(line_payload("event: message_start"), None);
        assert_eq!(line_payload("data: [DONE]"), None);
        assert_eq!(line_payload("   "), None);
    }
}
