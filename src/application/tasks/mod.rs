//! Background work owned by plugins

pub mod supervisor;

pub use supervisor::{CancelReport, TaskId, TaskInfo, TaskSupervisor};
