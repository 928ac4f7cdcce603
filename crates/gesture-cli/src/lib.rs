//! Command implementations behind the `gesture` binary.
pub mod commands;
pub mod dataset;
pub mod util;
