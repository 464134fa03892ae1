pub mod cli;
pub mod columns;
pub mod config;
pub mod correlator;
pub mod detector;
pub mod edge_api;
pub mod error;
pub mod export;
pub mod fetch;
pub mod logger;
pub mod merger;
pub mod records;
pub mod retry;
pub mod rules;
pub mod splitter;
pub mod table;

pub use error::PipelineError;
pub use records::{DetectionResult, IntegrationMethod};
