use stockbot_core::errors::InterfaceError;

use crate::manifest::Manifest;

/// Platform cap on message content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyMessage {
    pub content: String,
    pub ephemeral: bool,
}

impl ReplyMessage {
    pub fn public(content: impl Into<String>) -> Self {
        Self { content: truncate(content.into()), ephemeral: false }
    }

    /// Visible only to the invoking user.
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self { content: truncate(content.into()), ephemeral: true }
    }
}

fn truncate(content: String) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content;
    }
    let mut truncated: String = content.chars().take(MAX_CONTENT_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

pub fn help_message(manifest: &Manifest) -> ReplyMessage {
    let mut lines = vec!["**Available commands**".to_owned()];
    for command in manifest.commands() {
        let mut usage = format!("`/{}", command.name);
        for option in &command.options {
            if option.required {
                usage.push_str(&format!(" <{}>", option.name));
            } else {
                usage.push_str(&format!(" [{}]", option.name));
            }
        }
        usage.push('`');
        lines.push(format!("• {usage}: {}", command.description));
    }
    ReplyMessage::ephemeral(lines.join("\n"))
}

pub fn unknown_command_message(name: &str) -> ReplyMessage {
    ReplyMessage::ephemeral(format!("Unrecognized command `/{name}`. Try `/help`."))
}

pub fn unsupported_interaction_message(code: u8) -> ReplyMessage {
    ReplyMessage::ephemeral(format!("This interaction (type {code}) is not supported."))
}

pub fn failure_message(command: &str, error: &InterfaceError) -> ReplyMessage {
    ReplyMessage::ephemeral(format!(
        "`/{command}` failed: {} (ref `{}`)",
        error.user_message(),
        error.correlation_id()
    ))
}

#[cfg(test)]
mod tests {
    use stockbot_core::errors::InterfaceError;

    use super::{
        failure_message, help_message, unknown_command_message, ReplyMessage, MAX_CONTENT_CHARS,
    };
    use crate::manifest::default_manifest;

    #[test]
    fn long_content_is_truncated_to_platform_limit() {
        let message = ReplyMessage::public("x".repeat(MAX_CONTENT_CHARS + 50));
        assert_eq!(message.content.chars().count(), MAX_CONTENT_CHARS);
        assert!(message.content.ends_with('…'));
        assert!(!message.ephemeral);
    }

    #[test]
    fn help_lists_every_command_with_option_usage() {
        let manifest = default_manifest().expect("manifest");
        let message = help_message(&manifest);

        assert!(message.ephemeral);
        assert!(message.content.contains("`/analyze <code>`"));
        assert!(message.content.contains("`/batch [limit]`"));
        assert!(message.content.contains("`/help`"));
    }

    #[test]
    fn unknown_and_failure_messages_are_user_facing() {
        assert!(unknown_command_message("buy").content.contains("Unrecognized command `/buy`"));

        let error = InterfaceError::Internal {
            message: "stack trace".to_owned(),
            correlation_id: "1001".to_owned(),
        };
        let message = failure_message("analyze", &error);
        assert!(message.content.contains("unexpected internal error"));
        assert!(message.content.contains("1001"));
        assert!(!message.content.contains("stack trace"));
    }
}
