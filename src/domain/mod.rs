//! Domain layer - Core business objects with no runtime dependencies
//! 
//! This layer contains:
//! - Entities: Plugins, events, marketplace payloads, interactions
//! - Traits: Abstractions for infrastructure (Marketplace, DocumentStore)

pub mod entities;
pub mod traits;
