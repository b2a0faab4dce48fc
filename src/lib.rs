//! Spaced-repetition scheduling and learning-path planning over chunked
//! learning content.

pub mod config;
pub mod db;
pub mod error;
pub mod mastery;
pub mod models;
pub mod planner;
pub mod queue;
pub mod scheduler;
pub mod tracker;

pub use config::Config;
pub use db::{Database, LearningStore};
pub use error::{EngineError, Result, StoreError};
pub use queue::{Engine, LearnerStats};
