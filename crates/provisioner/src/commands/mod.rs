//! CLI subcommands.

pub mod run;
pub mod ssh;
