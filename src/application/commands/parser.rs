//! Command parser - turns raw chat text into a command invocation

use crate::domain::entities::CommandInvocation;

/// Recognizes commands typed with `/` or the configured prefix
pub struct CommandParser {
    command_prefix: String,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn is_command(&self, text: &str) -> bool {
        let text = text.trim_start();
        text.starts_with('/') || (!self.command_prefix.is_empty() && text.starts_with(&self.command_prefix))
    }

    /// Parse `text` into an invocation, or `None` for plain text
    pub fn parse(&self, chat_id: impl Into<String>, text: &str, user_id: Option<&str>) -> Option<CommandInvocation> {
        if !self.is_command(text) {
            return None;
        }
        let text = text.trim_start();

        // Remove the command prefix (either / or custom prefix)
        let cmd_text = if let Some(rest) = text.strip_prefix('/') {
            rest
        } else {
            &text[self.command_prefix.len()..]
        };

        let mut parts = cmd_text.split_whitespace();
        let name = parts.next()?.to_lowercase();
        // Chat platforms append the bot name in groups: /report@shop_bot
        let name = name.split('@').next().unwrap_or_default().to_string();
        if name.is_empty() {
            return None;
        }
        let args = parts.map(String::from).collect();

        let mut invocation = CommandInvocation::new(chat_id, name, args);
        invocation.user_id = user_id.map(String::from);
        Some(invocation)
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("/")
    }
}
