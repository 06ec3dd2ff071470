pub mod commands;
pub mod analyze;
pub mod show;

pub use commands::{Cli, Commands};
