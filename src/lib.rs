//! seglog: append-only session logs with segment rotation, and a batch
//! claim worker that embeds logged events into a work table.

pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod frame;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod store;
pub mod worker;
pub mod writer;

pub use config::Config;
pub use error::{Error, Result};
