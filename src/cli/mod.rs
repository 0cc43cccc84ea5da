// CLI module
// Public interface for command-line interface

mod commands;
mod input;
mod repl;

pub use commands::{handle_command, tool_listing, Command};
pub use input::InputHandler;
pub use repl::Repl;
