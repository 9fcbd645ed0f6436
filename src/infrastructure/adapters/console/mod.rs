//! Console adapter for development/testing
//!
//! [`ConsoleMarketplace`] stands in for the marketplace API and prints what
//! plugins send; [`ConsoleInput`] is the line grammar of the console
//! front-end.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::application::errors::BotError;
use crate::domain::entities::Order;
use crate::domain::traits::Marketplace;

/// In-process marketplace for local development
#[derive(Default)]
pub struct ConsoleMarketplace {
    orders: RwLock<BTreeMap<String, Order>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ConsoleMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an order known to the marketplace, replacing any earlier version
    pub fn record_order(&self, order: Order) {
        if let Ok(mut orders) = self.orders.write() {
            orders.insert(order.id.clone(), order);
        }
    }

    /// Messages sent so far as `(chat_id, text)`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Marketplace for ConsoleMarketplace {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BotError> {
        println!("[BOT -> {}] {}", chat_id, text);
        self.sent
            .lock()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn get_order_details(&self, order_id: &str) -> Result<Order, BotError> {
        self.orders
            .read()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::NotFound(format!("order {}", order_id)))
    }

    async fn get_orders(&self) -> Result<Vec<Order>, BotError> {
        Ok(self
            .orders
            .read()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .values()
            .cloned()
            .collect())
    }

    async fn refund_order(&self, order_id: &str) -> Result<(), BotError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BotError::NotFound(format!("order {}", order_id)))?;
        order.status = "REFUNDED".to_string();
        println!("[MARKET] order {} refunded", order_id);
        Ok(())
    }

    async fn find_chat_by_user_id(&self, user_id: &str) -> Result<Option<String>, BotError> {
        Ok(self
            .orders
            .read()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .values()
            .find(|o| o.buyer == user_id)
            .and_then(|o| o.chat_id.clone()))
    }
}

/// One line typed into the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    List,
    Enable(String),
    Disable(String),
    Delete(String),
    Commands,
    Quit,
    /// Raw command text, parsed by the host
    Command(String),
    /// Callback data, as if a button was pressed
    Callback(String),
    Order(Order),
    Message(String),
    Empty,
    Invalid(String),
}

impl ConsoleInput {
    /// Parse a console line. `prefix` is the bot's command prefix; `/` is
    /// always accepted too.
    pub fn parse(line: &str, prefix: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleInput::Empty;
        }

        if let Some(rest) = line.strip_prefix(':') {
            let mut parts = rest.split_whitespace();
            let op = parts.next().unwrap_or_default();
            let arg = parts.next().map(String::from);
            return match (op, arg) {
                ("list", _) => ConsoleInput::List,
                ("commands", _) => ConsoleInput::Commands,
                ("quit" | "q" | "exit", _) => ConsoleInput::Quit,
                ("enable", Some(id)) => ConsoleInput::Enable(id),
                ("disable", Some(id)) => ConsoleInput::Disable(id),
                ("delete", Some(id)) => ConsoleInput::Delete(id),
                ("enable" | "disable" | "delete", None) => ConsoleInput::Invalid(format!("usage: :{} <plugin-id>", op)),
                _ => ConsoleInput::Invalid(format!("unknown console command :{}", op)),
            };
        }

        if let Some(rest) = line.strip_prefix("@order") {
            return Self::parse_order(rest);
        }

        if let Some(data) = line.strip_prefix('!') {
            return ConsoleInput::Callback(data.trim().to_string());
        }

        if line.starts_with('/') || (!prefix.is_empty() && line.starts_with(prefix)) {
            return ConsoleInput::Command(line.to_string());
        }

        ConsoleInput::Message(line.to_string())
    }

    fn parse_order(rest: &str) -> Self {
        const USAGE: &str = "usage: @order <id> <buyer> <amount> [lot name...]";
        let mut parts = rest.split_whitespace();
        let (Some(id), Some(buyer), Some(amount)) = (parts.next(), parts.next(), parts.next()) else {
            return ConsoleInput::Invalid(USAGE.to_string());
        };
        let Ok(amount) = amount.parse::<f64>() else {
            return ConsoleInput::Invalid(format!("invalid amount `{}`; {}", amount, USAGE));
        };
        let lot = parts.collect::<Vec<_>>().join(" ");
        ConsoleInput::Order(
            Order::new(id, buyer, amount)
                .with_lot(lot, String::new())
                .with_chat("console"),
        )
    }
}

/// Reads console lines from stdin
pub struct ConsoleReader {
    lines: Lines<BufReader<Stdin>>,
    prefix: String,
}

impl ConsoleReader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prefix: prefix.into(),
        }
    }

    /// Next parsed line, or `None` at end of input
    pub async fn next_input(&mut self) -> Option<ConsoleInput> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(ConsoleInput::parse(&line, &self.prefix)),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to read console input: {}", e);
                None
            }
        }
    }
}
