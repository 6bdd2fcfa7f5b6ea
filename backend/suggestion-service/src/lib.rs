pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};

// Re-export suggestion engine components
pub use services::{RebuildOutcome, RotationSelector, SuggestionEngine, TopKBuilder};
