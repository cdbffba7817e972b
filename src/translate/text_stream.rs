use super::canonical_types::{
    completion_id, ChatCompletionChunk, ChatUsage, ChunkDelta, Role,
};

/// Chunk bookkeeping shared by the text-only stream converters: a stable id,
/// the assistant role on the first chunk, and at most one finish reason.
#[derive(Debug)]
pub struct TextStreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    finish_sent: bool,
}

impl TextStreamState {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
            finish_sent: false,
        }
    }

    /// `None` when the inputs carry nothing new for the caller.
    pub fn emit(
        &mut self,
        text: Option<String>,
        finish_reason: Option<String>,
        usage: Option<ChatUsage>,
    ) -> Option<ChatCompletionChunk> {
        let text = text.filter(|t| !t.is_empty());
        let finish_reason = finish_reason.filter(|_| !self.finish_sent);

        if text.is_none() && finish_reason.is_none() && usage.is_none() && self.role_sent {
            return None;
        }

        let role = (!self.role_sent).then_some(Role::Assistant);
        self.role_sent = true;
        if finish_reason.is_some() {
            self.finish_sent = true;
        }

        let delta = ChunkDelta {
            role,
            content: text,
            tool_calls: None,
        };
        Some(
            ChatCompletionChunk::new(&self.id, &self.model, self.created, delta)
                .with_finish_reason(finish_reason)
                .with_usage(usage),
        )
    }
}
