//! Rebuilds complete stream lines from arbitrarily fragmented text and turns
//! incremental tool-call argument fragments into cumulative strings.

use std::collections::HashMap;

use crate::adapter::StreamChunkConverter;
use crate::config::ParseErrorPolicy;
use crate::error::Result;
use crate::translate::canonical_types::ChatCompletionChunk;

/// Counters reported when a stream completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub lines: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub errors: usize,
    pub tool_calls: usize,
}

/// Session object for one logical stream. Not shared across streams.
pub struct StreamingReassembler {
    converter: Box<dyn StreamChunkConverter>,
    policy: ParseErrorPolicy,
    buffer: String,
    arguments: HashMap<u32, String>,
    stats: StreamStats,
    completed: bool,
    aborted: bool,
}

impl StreamingReassembler {
    pub fn new(converter: Box<dyn StreamChunkConverter>, policy: ParseErrorPolicy) -> Self {
        Self {
            converter,
            policy,
            buffer: String::new(),
            arguments: HashMap::new(),
            stats: StreamStats::default(),
            completed: false,
            aborted: false,
        }
    }

    /// Append `fragment` and dispatch every line it completes. The results
    /// are in line order; a failed line does not stop later ones unless the
    /// policy is [`ParseErrorPolicy::Abort`].
    pub fn feed(&mut self, fragment: &str) -> Vec<Result<ChatCompletionChunk>> {
        let mut out = Vec::new();
        if self.completed || self.aborted {
            return out;
        }

        self.buffer.push_str(fragment);
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.dispatch(&line, &mut out);
            if self.aborted {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush whatever is still buffered as a final line and log the stream
    /// summary. Later calls return nothing.
    pub fn complete(&mut self) -> Vec<Result<ChatCompletionChunk>> {
        let mut out = Vec::new();
        if self.completed {
            return out;
        }
        self.completed = true;

        let rest = std::mem::take(&mut self.buffer);
        if !self.aborted {
            self.dispatch(&rest, &mut out);
        }

        tracing::info!(
            lines = self.stats.lines,
            chunks = self.stats.chunks,
            skipped = self.stats.skipped,
            errors = self.stats.errors,
            tool_calls = self.stats.tool_calls,
            aborted = self.aborted,
            "Stream complete"
        );
        out
    }

    /// Release buffered text and argument state. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.buffer.clear();
        self.buffer.shrink_to_fit();
        self.arguments.clear();
        self.arguments.shrink_to_fit();
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Arguments accumulated so far for tool ordinal `index`.
    pub fn arguments(&self, index: u32) -> Option<&str> {
        self.arguments.get(&index).map(String::as_str)
    }

    fn dispatch(&mut self, raw: &str, out: &mut Vec<Result<ChatCompletionChunk>>) {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return;
        }
        self.stats.lines += 1;

        match self.converter.convert_stream_chunk(line) {
            Ok(Some(mut chunk)) => {
                self.accumulate(&mut chunk);
                self.stats.chunks += 1;
                out.push(Ok(chunk));
            }
            Ok(None) => self.stats.skipped += 1,
            Err(e) => {
                self.stats.errors += 1;
                tracing::warn!(error = %e, policy = ?self.policy, "Stream line failed");
                if self.policy == ParseErrorPolicy::Abort {
                    self.aborted = true;
                }
                out.push(Err(e));
            }
        }
    }

    fn accumulate(&mut self, chunk: &mut ChatCompletionChunk) {
        let calls = chunk
            .choices
            .iter_mut()
            .filter_map(|c| c.delta.tool_calls.as_mut())
            .flatten();

        for call in calls {
            let Some(arguments) = call.function.as_mut().and_then(|f| f.arguments.as_mut()) else {
                continue;
            };
            let buffer = self.arguments.entry(call.index).or_insert_with(|| {
                self.stats.tool_calls += 1;
                String::new()
            });
            buffer.push_str(arguments);
            arguments.clone_from(buffer);
        }
    }
}

impl Drop for StreamingReassembler {
    fn drop(&mut self) {
        self.cleanup();
    }
}
