//! Order assistant - built-in example plugin
//!
//! Thanks buyers for new orders, answers "help" messages, keeps a log of
//! orders in its storage and reports it through `/orders`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::commands::{CallbackBinding, CommandBinding};
use crate::application::context::PluginContext;
use crate::application::handlers::{HandlerError, HandlerResult};
use crate::domain::entities::Order;
use crate::infrastructure::plugins::{ModuleMetadata, PluginBinder, PluginModule};

pub const PLUGIN_ID: &str = "order-assistant";
const ORDER_LOG: &str = "orders.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLogEntry {
    pub order_id: String,
    pub buyer: String,
    pub amount: f64,
    pub lot_name: String,
    pub received_at: DateTime<Utc>,
}

impl From<&Order> for OrderLogEntry {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            buyer: order.buyer.clone(),
            amount: order.amount,
            lot_name: order.lot_name.clone(),
            received_at: Utc::now(),
        }
    }
}

pub struct OrderAssistant {
    heartbeat: Duration,
}

impl OrderAssistant {
    pub fn new(heartbeat: Duration) -> Self {
        Self { heartbeat }
    }
}

impl Default for OrderAssistant {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

async fn read_log(ctx: &PluginContext) -> Result<Vec<OrderLogEntry>, HandlerError> {
    Ok(ctx.storage().read_json(ORDER_LOG).await?.unwrap_or_default())
}

async fn on_init(ctx: PluginContext, heartbeat: Duration) -> HandlerResult {
    let logged = read_log(&ctx).await?.len();
    info!("Order assistant ready, {} order(s) on record", logged);

    ctx.spawn("heartbeat", move |token| async move {
        let mut beats: u64 = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(heartbeat) => {
                    beats += 1;
                    debug!("Order assistant heartbeat #{}", beats);
                }
            }
        }
        Ok(())
    })?;
    Ok(())
}

async fn on_order(order: &Order, ctx: PluginContext) -> HandlerResult {
    let mut log = read_log(&ctx).await?;
    log.push(OrderLogEntry::from(order));
    ctx.storage().write_json(ORDER_LOG, &log).await?;

    if let Some(chat_id) = &order.chat_id {
        let lot = if order.lot_name.is_empty() { "your order" } else { order.lot_name.as_str() };
        ctx.marketplace()
            .send_message(
                chat_id,
                &format!("Thanks for buying {}, {}! Order #{} is on its way.", lot, order.buyer, order.id),
            )
            .await?;
    }
    Ok(())
}

impl PluginModule for OrderAssistant {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new(
            PLUGIN_ID,
            "Order assistant",
            env!("CARGO_PKG_VERSION"),
            "Greets buyers, answers help requests and keeps an order log",
            "bazaar-bot",
        )
    }

    fn bind(&self, binder: &mut PluginBinder) -> Result<(), HandlerError> {
        let heartbeat = self.heartbeat;
        binder
            .on_init(move |ctx| on_init(ctx, heartbeat))
            .on_new_order(|order, ctx| async move { on_order(&order, ctx).await })
            .on_new_message(|message, ctx| async move {
                if message.content.to_lowercase().contains("help") {
                    ctx.marketplace()
                        .send_message(
                            &message.chat_id,
                            "Hi! Describe the problem with your order and a seller will answer shortly.",
                        )
                        .await?;
                }
                Ok(())
            })
            .on_delete(|ctx| async move {
                info!("Order assistant removed; {} keeps its order log", ctx.plugin_id());
                Ok(())
            })
            .command(
                "orders",
                CommandBinding::new("Show how many orders were logged", |inv, ctx| async move {
                    let count = read_log(&ctx).await?.len();
                    ctx.marketplace()
                        .send_message(&inv.chat_id, &format!("{} order(s) logged", count))
                        .await?;
                    Ok(())
                }),
            )
            .callback(CallbackBinding::with_prefix("orders:clear", "orders:clear", |inter, ctx| async move {
                ctx.storage().write_json(ORDER_LOG, &Vec::<OrderLogEntry>::new()).await?;
                ctx.marketplace().send_message(&inter.chat_id, "Order log cleared").await?;
                Ok(())
            }));
        Ok(())
    }
}
