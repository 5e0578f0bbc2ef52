//! Command-line surface: thin pass-throughs to the core components.

pub mod commands;

pub use commands::{Command, Opt};
