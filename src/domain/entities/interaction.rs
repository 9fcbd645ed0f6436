/// A command typed by a user, already split by the chat front-end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub chat_id: String,
    pub user_id: Option<String>,
    /// Command token without prefix
    pub command: String,
    pub args: Vec<String>,
}

impl CommandInvocation {
    pub fn new(chat_id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: None,
            command: command.into(),
            args,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// An interaction payload such as an inline button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub chat_id: String,
    pub user_id: Option<String>,
    pub data: String,
}

impl Interaction {
    pub fn new(chat_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: None,
            data: data.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
