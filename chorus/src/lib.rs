//! Send one prompt to several LLM backends at once and collect their
//! streamed answers side by side.

pub mod config;
pub mod error;
pub mod fanout;
pub mod provider;
pub mod relay;

pub use error::{ChorusError, Result};
