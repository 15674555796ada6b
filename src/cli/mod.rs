//! Command-line interface for rosterwatch.

mod commands;

pub use commands::{is_verbose, run};
