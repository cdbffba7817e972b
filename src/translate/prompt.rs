//! Flattening chat messages into single prompt strings for completion-style
//! backends.

use super::canonical_types::{ChatMessage, Role};
use crate::adapter::BackendFamily;

/// One message reduced to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Text of every message, in order. Images and tool calls have no place in a
/// flat prompt and are dropped with a log line.
pub fn flatten_turns(family: BackendFamily, messages: &[ChatMessage]) -> Vec<Turn> {
    messages
        .iter()
        .filter_map(|msg| {
            if msg.content.as_ref().is_some_and(|c| c.has_images()) {
                tracing::info!(family = %family, "Dropping image parts from flattened prompt");
            }
            if msg.tool_calls.as_ref().is_some_and(|c| !c.is_empty()) {
                tracing::info!(family = %family, "Dropping tool calls from flattened prompt");
            }
            let text = msg.text();
            if text.is_empty() {
                return None;
            }
            Some(Turn {
                role: msg.role,
                text,
            })
        })
        .collect()
}

/// Labels for a `Label: text` transcript.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptStyle {
    pub user: &'static str,
    pub assistant: &'static str,
}

/// `User: ...` / `Bot: ...` style transcript ending in the assistant cue.
/// System text leads the prompt unlabeled; tool output is labeled as user.
pub fn transcript(turns: &[Turn], style: TranscriptStyle) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(turns.len() + 1);
    for turn in turns {
        let section = match turn.role {
            Role::System => turn.text.clone(),
            Role::User | Role::Tool => format!("{}: {}", style.user, turn.text),
            Role::Assistant => format!("{}: {}", style.assistant, turn.text),
        };
        sections.push(section);
    }
    sections.push(format!("{}:", style.assistant));
    sections.join("\n\n")
}

/// Llama 3 header-token chat template, ending with an open assistant header.
pub fn llama_template(turns: &[Turn]) -> String {
    let mut out = String::from("<|begin_of_text|>");
    for turn in turns {
        let role = match turn.role {
            Role::System => "system",
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };
        out.push_str("<|start_header_id|>");
        out.push_str(role);
        out.push_str("<|end_header_id|>\n\n");
        out.push_str(&turn.text);
        out.push_str("<|eot_id|>");
    }
    out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    out
}

/// Mistral `[INST]` template. System text is folded into the first
/// instruction.
pub fn mistral_template(turns: &[Turn]) -> String {
    let system = turns
        .iter()
        .filter(|t| t.role == Role::System)
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut pending_system = (!system.is_empty()).then_some(system);

    let mut out = String::from("<s>");
    for turn in turns {
        match turn.role {
            Role::System => {}
            Role::User | Role::Tool => {
                out.push_str("[INST] ");
                if let Some(system) = pending_system.take() {
                    out.push_str(&system);
                    out.push_str("\n\n");
                }
                out.push_str(&turn.text);
                out.push_str(" [/INST]");
            }
            Role::Assistant => {
                out.push_str(&turn.text);
                out.push_str("</s>");
            }
        }
    }
    if let Some(system) = pending_system {
        out.push_str("[INST] ");
        out.push_str(&system);
        out.push_str(" [/INST]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical_types::{ChatContent, ContentPart, ImageUrlDetail};

    fn turns() -> Vec<Turn> {
        flatten_turns(
            BackendFamily::Titan,
            &[
                ChatMessage::system("Be terse."),
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Hello."),
                ChatMessage::user("Bye"),
            ],
        )
    }

    #[test]
    fn test_transcript_titan_style() {
        let style = TranscriptStyle {
            user: "User",
            assistant: "Bot",
        };
        assert_eq!(
            transcript(&turns(), style),
            "Be terse.\n\nUser: Hi\n\nBot: Hello.\n\nUser: Bye\n\nBot:"
        );
    }

    #[test]
    fn test_llama_template() {
        let prompt = llama_template(&turns());
        assert!(prompt.starts_with(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\nBe terse.<|eot_id|>"
        ));
        assert!(prompt.ends_with("Bye<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn test_mistral_template() {
        assert_eq!(
            mistral_template(&turns()),
            "<s>[INST] Be terse.\n\nHi [/INST]Hello.</s>[INST] Bye [/INST]"
        );
    }

    #[test]
    fn test_mistral_system_only() {
        let turns = vec![Turn {
            role: Role::System,
            text: "rules".to_string(),
        }];
        assert_eq!(mistral_template(&turns), "<s>[INST] rules [/INST]");
    }

    #[test]
    fn test_images_dropped_text_kept() {
        let msg = ChatMessage {
            role: Role::User,
            content: Some(ChatContent::Parts(vec![
                ContentPart::Text {
                    text: "look".to_string(),
                    cache_control: None,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: "https://x/y.png".to_string(),
                        detail: None,
                    },
                    cache_control: None,
                },
            ])),
            ..ChatMessage::default()
        };
        let turns = flatten_turns(BackendFamily::Llama, &[msg]);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "look");
    }
}
