//! Command implementations for the Prefgen CLI.

pub mod runs;
pub mod train;
pub mod types;

pub use types::{RunsCommand, TrainArgs};
