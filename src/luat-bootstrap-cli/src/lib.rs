//! Terminal host for the luat-lsp bootstrapper.
//!
//! Renders prompts, progress and errors on the terminal and binds the
//! bootstrapper's user commands to subcommands.

pub mod cli;
pub mod prompt;
