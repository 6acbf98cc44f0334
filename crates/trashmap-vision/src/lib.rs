//! Client for the hosted generative model that classifies frames and writes
//! insight text.

pub mod client;
pub mod error;
mod parse;
mod prompt;
mod retry;
pub mod types;

pub use client::GeminiClient;
pub use error::VisionError;
