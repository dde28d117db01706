pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
