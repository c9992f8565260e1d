//! User-facing channels.

pub mod cli;

pub use cli::{CliSession, Command};
