//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use bazaar_bot::domain::entities::Order;
use bazaar_bot::domain::traits::Marketplace;
use bazaar_bot::infrastructure::plugins::{PluginDefinition, PluginRegistry};
use bazaar_bot::infrastructure::storage::PluginStorage;
use bazaar_bot::BotError;

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Ordered record of what handlers saw
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Marketplace that records every message sent through it
#[derive(Default)]
pub struct RecordingMarketplace {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMarketplace {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Marketplace for RecordingMarketplace {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BotError> {
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
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

pub fn registry(marketplace: Arc<RecordingMarketplace>) -> PluginRegistry {
    ensure_init();
    PluginRegistry::new(marketplace, Arc::new(PluginStorage::in_memory()))
        .with_grace_period(Duration::from_millis(300))
}

/// A module with complete metadata and no bindings yet
pub fn definition(id: &str) -> PluginDefinition {
    PluginDefinition::new(id)
        .name(format!("Plugin {}", id))
        .version("1.0.0")
        .description("Integration test plugin")
        .author("Tests")
}
