//! Engine configuration.
//!
//! This module handles loading, validating and applying the engine
//! configuration: execution policy, implicit ordering, diff exclusions and
//! the state backend.

mod parser;
mod types;
mod validator;

pub use parser::{
    ConfigParser, ENV_CONCURRENCY, ENV_POLICY, ENV_STATE_BACKEND, ENV_STATE_BUCKET,
    ENV_STATE_PATH, ENV_STATE_PREFIX, ENV_STATE_REGION,
};
pub use types::{DEFAULT_CONCURRENCY, EngineConfig, StateBackend, StateConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
