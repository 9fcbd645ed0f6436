//! Event handling - Delivery of lifecycle and marketplace events to plugins

pub mod dispatcher;

pub use dispatcher::{DispatchHandle, DispatchOptions, DispatchReport, EventDispatcher};
