pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod sensing;

pub use error::{PerceptionError, Result};
