//! Prompt templates for provider calls.
//!
//! Chat-style APIs get the system prompt, one user/assistant pair per
//! context turn and the query as separate messages. Completion-style APIs
//! get everything flattened into [`CONVERSATION_PROMPT`].

use recall_core::conversation::ContextTurn;

use crate::types::ChatMessage;

/// System prompt shared by all adapters.
pub const SYSTEM_PROMPT: &str = r"You are a helpful assistant answering questions in a conversation.
RULES:
- Answer the latest question directly.
- Keep the answer under 4 sentences.
- Use the earlier exchanges only as context.";

/// Flattened prompt for completion-style APIs.
pub const CONVERSATION_PROMPT: &str = r"{system}

Earlier exchanges:
{history}

Question: {query}
Answer:";

/// Replace `{key}` placeholders in `template`.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Format context turns as `User:`/`Assistant:` lines.
#[must_use]
pub fn format_history(context: &[ContextTurn]) -> String {
    if context.is_empty() {
        return "(none)".to_string();
    }
    context
        .iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the flattened prompt.
#[must_use]
pub fn render_prompt(query: &str, context: &[ContextTurn]) -> String {
    let history = format_history(context);
    render_template(CONVERSATION_PROMPT, &[
        ("system", SYSTEM_PROMPT),
        ("history", &history),
        ("query", query),
    ])
}

/// Build the chat message list.
#[must_use]
pub fn build_messages(query: &str, context: &[ContextTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.len() * 2 + 2);
    messages.push(ChatMessage::new("system", SYSTEM_PROMPT));
    for turn in context {
        messages.push(ChatMessage::new("user", turn.user.clone()));
        messages.push(ChatMessage::new("assistant", turn.assistant.clone()));
    }
    messages.push(ChatMessage::new("user", query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Vec<ContextTurn> {
        vec![ContextTurn {
            user: "hi".into(),
            assistant: "hello!".into(),
        }]
    }

    #[test]
    fn template_substitution() {
        let out = render_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x and y and x");
    }

    #[test]
    fn prompt_includes_history_and_query() {
        let prompt = render_prompt("what is rust?", &ctx());
        assert!(prompt.contains("User: hi\nAssistant: hello!"));
        assert!(prompt.ends_with("Question: what is rust?\nAnswer:"));
        assert!(!prompt.contains("{system}"));

        assert!(render_prompt("q", &[]).contains("(none)"));
    }

    #[test]
    fn messages_alternate_roles() {
        let messages = build_messages("next?", &ctx());
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content, "next?");
    }
}
