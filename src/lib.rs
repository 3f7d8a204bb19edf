pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod metrics;
pub mod models;
pub mod store;
pub mod strategy;

pub use engine::{CopyEngine, EngineStats};
pub use errors::EngineError;
