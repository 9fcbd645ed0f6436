//! Plugin commands and callbacks

pub mod binding;
pub mod parser;
pub mod registrar;

pub use binding::{CallbackBinding, CommandBinding};
pub use parser::CommandParser;
pub use registrar::{CallbackInfo, CallbackOutcome, CommandInfo, CommandOutcome, CommandRegistrar};
