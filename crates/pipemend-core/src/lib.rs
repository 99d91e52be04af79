pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod escalation;
pub mod github;
pub mod healer;
pub mod hosting;
pub mod llm;
pub mod orchestrator;
pub mod patch;
pub mod pipeline;
pub mod renderer;
pub mod risk;
pub mod state;
pub mod strategy;
pub mod types;
pub mod validator;

#[cfg(test)]
mod testing;

pub use error::{PipemendError, Result};
pub use orchestrator::Engine;
