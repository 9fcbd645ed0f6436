use serde::{Deserialize, Serialize};

/// A chat message received from the marketplace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: String,
    /// Buyer id of the author, not a display name
    pub author: String,
    pub content: String,
    pub message_id: String,
}

impl ChatMessage {
    pub fn new(
        chat_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            author: author.into(),
            content: content.into(),
            message_id: message_id.into(),
        }
    }

    /// First `limit` characters of the content, for logs
    pub fn preview(&self, limit: usize) -> String {
        self.content.chars().take(limit).collect()
    }
}

/// An order placed on the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Buyer display name
    pub buyer: String,
    pub amount: f64,
    pub lot_name: String,
    pub lot_description: String,
    /// Marketplace status string (CREATED, COMPLETED, REFUND, ...)
    pub status: String,
    pub chat_id: Option<String>,
}

impl Order {
    pub fn new(id: impl Into<String>, buyer: impl Into<String>, amount: f64) -> Self {
        Self {
            id: id.into(),
            buyer: buyer.into(),
            amount,
            lot_name: String::new(),
            lot_description: String::new(),
            status: "CREATED".to_string(),
            chat_id: None,
        }
    }

    pub fn with_lot(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.lot_name = name.into();
        self.lot_description = description.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}
