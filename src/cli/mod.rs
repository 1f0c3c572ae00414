pub mod commands;
pub mod progress;
pub mod run;
pub mod session;

pub use commands::{Cli, Commands};
