//! Application services - Business logic orchestration

pub mod host;

pub use host::PluginHost;
