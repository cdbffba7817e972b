//! Adapter from a network byte stream to canonical chunks.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{BridgeError, Result};
use crate::reassembler::StreamingReassembler;
use crate::translate::canonical_types::ChatCompletionChunk;

/// Decode `bytes` as UTF-8 text, feed it through `reassembler` and yield the
/// resulting chunks.
///
/// A transport error is yielded once and ends the stream. The reassembler is
/// cleaned up when the stream finishes, fails, or is dropped early.
pub fn reassemble_stream<S, E>(
    bytes: S,
    reassembler: StreamingReassembler,
) -> impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    async_stream::stream! {
        let mut reassembler = reassembler;
        let mut decoder = Utf8Decoder::default();
        let mut failed = false;

        tokio::pin!(bytes);

        while let Some(next) = bytes.next().await {
            let chunk = match next {
                Ok(c) => c,
                Err(e) => {
                    let err: BridgeError = e.into();
                    tracing::warn!(error = %err, "Byte stream error");
                    failed = true;
                    yield Err(err);
                    break;
                }
            };

            let text = decoder.push(&chunk);
            for item in reassembler.feed(&text) {
                yield item;
            }
        }

        if !failed {
            let tail = decoder.finish();
            if !tail.is_empty() {
                for item in reassembler.feed(&tail) {
                    yield item;
                }
            }
            for item in reassembler.complete() {
                yield item;
            }
        }

        reassembler.cleanup();
    }
}

/// Incremental UTF-8 decoding that holds back a multi-byte character split
/// across network chunks until the rest of it arrives.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), Some(e.error_len())),
            };
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                None => {
                    self.pending.clear();
                    break;
                }
                // Genuinely invalid sequence.
                Some(Some(len)) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                // Truncated character; wait for more bytes.
                Some(None) => {
                    self.pending.drain(..valid);
                    break;
                }
            }
        }
        out
    }

    fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StreamChunkConverter;
    use crate::config::ParseErrorPolicy;
    use crate::translate::canonical_types::ChunkDelta;
    use crate::translate::claude_streaming::ClaudeStreamConverter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn claude_reassembler() -> StreamingReassembler {
        StreamingReassembler::new(
            Box::new(ClaudeStreamConverter::new("m")),
            ParseErrorPolicy::Continue,
        )
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut d = Utf8Decoder::default();
        let bytes = "café".as_bytes();
        assert_eq!(d.push(&bytes[..4]), "caf");
        assert_eq!(d.push(&bytes[4..]), "é");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut d = Utf8Decoder::default();
        assert_eq!(d.push(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let line = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"café"}}"#;
        let bytes = format!("{line}\n").into_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let chunks = vec![
            Ok::<_, BridgeError>(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let out: Vec<_> = reassemble_stream(futures::stream::iter(chunks), claude_reassembler())
            .collect()
            .await;

        assert_eq!(out.len(), 1);
        let chunk = out[0].as_ref().unwrap();
        assert_eq!(chunk.delta().unwrap().content.as_deref(), Some("café"));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_flushed() {
        let chunks = vec![Ok::<_, BridgeError>(Bytes::from_static(
            br#"{"type":"message_stop"}"#,
        ))];
        let out: Vec<_> = reassemble_stream(futures::stream::iter(chunks), claude_reassembler())
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().finish_reason(), Some("stop"));
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"type\":\"message_st")),
            Err(BridgeError::backend("connection reset")),
            Ok(Bytes::from_static(b"op\"}\n")),
        ];
        let out: Vec<_> = reassemble_stream(futures::stream::iter(chunks), claude_reassembler())
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(BridgeError::Backend { .. })));
    }

    struct DropFlag {
        dropped: Arc<AtomicBool>,
    }

    impl StreamChunkConverter for DropFlag {
        fn convert_stream_chunk(&mut self, line: &str) -> Result<Option<ChatCompletionChunk>> {
            let delta = ChunkDelta {
                content: Some(line.to_string()),
                ..ChunkDelta::default()
            };
            Ok(Some(ChatCompletionChunk::new("id", "m", 0, delta)))
        }
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_reassembler() {
        let dropped = Arc::new(AtomicBool::new(false));
        let reassembler = StreamingReassembler::new(
            Box::new(DropFlag {
                dropped: Arc::clone(&dropped),
            }),
            ParseErrorPolicy::Continue,
        );

        let bytes = futures::stream::iter(vec![Ok::<_, BridgeError>(Bytes::from_static(
            b"first\nunfinished",
        ))])
        .chain(futures::stream::pending());

        let mut stream = Box::pin(reassemble_stream(bytes, reassembler));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.delta().unwrap().content.as_deref(), Some("first"));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(stream);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
