//! Adapters - Platform integrations

pub mod console;

pub use console::{ConsoleInput, ConsoleMarketplace, ConsoleReader};
