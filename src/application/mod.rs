//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Services: The plugin host facade
//! - Events: Event dispatch to plugin handlers
//! - Commands: Plugin command and callback routing
//! - Tasks: Background task supervision
//! - Errors: Domain-specific errors

pub mod commands;
pub mod context;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
