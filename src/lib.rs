pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod embed;
pub mod fusion;
mod metrics;
pub mod pipeline;
pub mod tiling;
pub mod utils;

pub use config::Opts;
pub use pipeline::{Pipeline, PipelineOptions, RunSummary};
