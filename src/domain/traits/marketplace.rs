use async_trait::async_trait;
use crate::domain::entities::Order;
use crate::application::errors::BotError;

/// Marketplace client capability handed to plugin handlers.
///
/// The concrete client performs authenticated HTTP calls; the plugin runtime
/// only depends on this surface.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Send a text message into a chat
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BotError>;

    /// Fetch full order data, including the chat it belongs to
    async fn get_order_details(&self, order_id: &str) -> Result<Order, BotError>;

    /// List the seller's orders
    async fn get_orders(&self) -> Result<Vec<Order>, BotError>;

    /// Refund an order
    async fn refund_order(&self, order_id: &str) -> Result<(), BotError>;

    /// Find the chat opened with a user, if any
    async fn find_chat_by_user_id(&self, user_id: &str) -> Result<Option<String>, BotError>;
}
