pub mod agents;
pub mod audit;
pub mod cli;
pub mod config;
pub mod errors;
pub mod git;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod reporting;
pub mod session;
pub mod utils;
