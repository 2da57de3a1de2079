pub mod cli;
pub mod config;
pub mod dates;
pub mod digest;
pub mod discovery;
pub mod entities;
pub mod error;
pub mod extract;
pub mod html;
pub mod http;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod roster;
pub mod search;
pub mod select;
pub mod sources;
pub mod store;

pub use error::PipelineError;
pub use jobs::{Pipeline, RunMode, RunReport};
