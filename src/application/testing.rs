//! Shared fixtures for unit tests

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::context::PluginContext;
use crate::application::errors::BotError;
use crate::application::tasks::TaskSupervisor;
use crate::domain::entities::Order;
use crate::domain::traits::Marketplace;
use crate::infrastructure::storage::PluginStorage;

/// Marketplace that accepts everything and knows nothing
pub struct NullMarketplace;

#[async_trait]
impl Marketplace for NullMarketplace {
    async fn send_message(&self, _chat_id: &str, _text: &str) -> Result<(), BotError> {
        Ok(())
    }

    async fn get_order_details(&self, order_id: &str) -> Result<Order, BotError> {
        Err(BotError::NotFound(order_id.to_string()))
    }

    async fn get_orders(&self) -> Result<Vec<Order>, BotError> {
        Ok(Vec::new())
    }

    async fn refund_order(&self, _order_id: &str) -> Result<(), BotError> {
        Ok(())
    }

    async fn find_chat_by_user_id(&self, _user_id: &str) -> Result<Option<String>, BotError> {
        Ok(None)
    }
}

pub fn test_context(plugin_id: &str) -> PluginContext {
    let storage = Arc::new(PluginStorage::in_memory());
    PluginContext::new(
        plugin_id,
        Arc::new(NullMarketplace),
        storage.scoped(plugin_id),
        Arc::new(TaskSupervisor::default()),
    )
}
