//! Shared types for the batch categorizer workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{ApiKey, Secret};
