#![doc = include_str!("../README.md")]

pub mod cli;
pub mod cluster;
pub mod compare;
pub mod config;
pub mod geo;
pub mod labels;
pub mod output;
pub mod pipeline;
pub mod types;

pub use compare::Comparison;
pub use config::Config;
pub use pipeline::CountPipeline;
pub use types::{Boat, ClassLabel, Detection};
