//! Domain traits - Abstractions for infrastructure implementations

pub mod marketplace;
pub mod store;

pub use marketplace::Marketplace;
pub use store::DocumentStore;
