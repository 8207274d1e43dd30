//! Prompt construction with conversation history.
//!
//! Supports the three completion-prompt styles used by local model
//! servers: ChatML, Llama 2 chat, and plain `Role:` lines.

use crate::config::PromptFormat;

/// Message role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn tag(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the flattened conversation.
#[derive(Debug, Clone)]
struct Message {
    role: Role,
    content: String,
}

/// Builds complete prompts from a system instruction, history and the
/// current query.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    format: PromptFormat,
}

impl PromptBuilder {
    /// Create a builder for the given format.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, format: PromptFormat) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            format,
        }
    }

    /// Build the full prompt: system instruction, then alternating
    /// user/assistant turns, then the current query with the assistant
    /// primer the format expects.
    #[must_use]
    pub fn build(&self, history: &[(String, String)], current_query: &str) -> String {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);

        if !self.system_prompt.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: self.system_prompt.clone(),
            });
        }
        for (user_msg, assistant_msg) in history {
            messages.push(Message {
                role: Role::User,
                content: user_msg.clone(),
            });
            messages.push(Message {
                role: Role::Assistant,
                content: assistant_msg.clone(),
            });
        }
        messages.push(Message {
            role: Role::User,
            content: current_query.to_owned(),
        });

        match self.format {
            PromptFormat::ChatMl => format_chatml(&messages),
            PromptFormat::Llama2 => format_llama2(&messages),
            PromptFormat::Plain => format_plain(&messages),
        }
    }
}

/// `<|im_start|>role\ncontent<|im_end|>` blocks, trailing assistant primer.
fn format_chatml(messages: &[Message]) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .map(|m| format!("<|im_start|>{}\n{}<|im_end|>", m.role.tag(), m.content))
        .collect();
    parts.push("<|im_start|>assistant\n".to_owned());
    parts.join("\n")
}

/// Llama 2 chat format: `[INST] <<SYS>>...<</SYS>>` then alternating
/// turns separated by `[/INST]` and `</s><s>`.
fn format_llama2(messages: &[Message]) -> String {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str());
    let dialog: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    let mut prompt = match system {
        Some(system) => format!("[INST] <<SYS>>\n{system}\n<</SYS>>\n\n"),
        None => "[INST] ".to_owned(),
    };

    for (i, message) in dialog.iter().enumerate() {
        match message.role {
            Role::User => {
                if i > 0 {
                    prompt.push_str("[INST] ");
                }
                prompt.push_str(&format!("{} [/INST]", message.content));
            }
            Role::Assistant => {
                prompt.push_str(&format!(" {} </s><s>", message.content));
            }
            Role::System => {}
        }
    }

    prompt
}

/// `System:` / `User:` / `Assistant:` lines, double-newline separated,
/// trailing `Assistant:` primer.
fn format_plain(messages: &[Message]) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{label}: {}", m.content)
        })
        .collect();
    parts.push("Assistant:".to_owned());
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<(String, String)> {
        vec![
            ("what's your name?".to_owned(), "I'm Vesper.".to_owned()),
            ("what can you do?".to_owned(), "Answer questions.".to_owned()),
        ]
    }

    /// Extract the last user message from a plain-format prompt.
    fn plain_last_user(prompt: &str) -> Option<String> {
        prompt
            .split("\n\n")
            .filter_map(|line| line.strip_prefix("User: "))
            .last()
            .map(str::to_owned)
    }

    /// Extract the last user message from a ChatML prompt.
    fn chatml_last_user(prompt: &str) -> Option<String> {
        prompt
            .split("<|im_start|>user\n")
            .last()?
            .split("<|im_end|>")
            .next()
            .map(str::to_owned)
    }

    /// Extract the last user message from a Llama 2 prompt.
    fn llama2_last_user(prompt: &str) -> Option<String> {
        let segment = prompt.rsplit("[INST] ").next()?;
        segment
            .split(" [/INST]")
            .next()
            .map(|s| s.rsplit("<</SYS>>\n\n").next().unwrap_or(s).to_owned())
    }

    #[test]
    fn plain_roundtrips_query_without_history() {
        let builder = PromptBuilder::new("be brief", PromptFormat::Plain);
        let prompt = builder.build(&[], "hello there");
        assert_eq!(plain_last_user(&prompt).as_deref(), Some("hello there"));
        assert!(prompt.starts_with("System: be brief"));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn chatml_roundtrips_query_without_history() {
        let builder = PromptBuilder::new("be brief", PromptFormat::ChatMl);
        let prompt = builder.build(&[], "hello there");
        assert_eq!(chatml_last_user(&prompt).as_deref(), Some("hello there"));
        assert!(prompt.starts_with("<|im_start|>system\nbe brief<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn llama2_roundtrips_query_without_history() {
        let builder = PromptBuilder::new("be brief", PromptFormat::Llama2);
        let prompt = builder.build(&[], "hello there");
        assert_eq!(llama2_last_user(&prompt).as_deref(), Some("hello there"));
        assert!(prompt.starts_with("[INST] <<SYS>>\nbe brief\n<</SYS>>"));
        assert!(prompt.ends_with(" [/INST]"));
    }

    #[test]
    fn plain_interleaves_history_in_order() {
        let builder = PromptBuilder::new("sys", PromptFormat::Plain);
        let prompt = builder.build(&history(), "bye");
        let expected = "System: sys\n\n\
                        User: what's your name?\n\n\
                        Assistant: I'm Vesper.\n\n\
                        User: what can you do?\n\n\
                        Assistant: Answer questions.\n\n\
                        User: bye\n\n\
                        Assistant:";
        assert_eq!(prompt, expected);
    }

    #[test]
    fn chatml_keeps_query_last() {
        let builder = PromptBuilder::new("sys", PromptFormat::ChatMl);
        let prompt = builder.build(&history(), "bye");
        assert_eq!(chatml_last_user(&prompt).as_deref(), Some("bye"));
    }

    #[test]
    fn llama2_separates_turns() {
        let builder = PromptBuilder::new("", PromptFormat::Llama2);
        let prompt = builder.build(&history(), "bye");
        assert!(prompt.starts_with("[INST] "));
        assert!(prompt.contains(" I'm Vesper. </s><s>"));
        assert_eq!(llama2_last_user(&prompt).as_deref(), Some("bye"));
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let builder = PromptBuilder::new("", PromptFormat::Plain);
        let prompt = builder.build(&[], "hi");
        assert!(!prompt.contains("System:"));
        assert!(prompt.starts_with("User: hi"));
    }
}
