//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! builder (code) or TOML file
//!     → loader.rs (parse & deserialize into a raw builder)
//!     → validation.rs (semantic range checks)
//!     → ResilienceConfig / RetryConfig / CircuitBreakerConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once built; there is no setter on a built value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, ResilienceConfig, ResilienceConfigBuilder,
    RetryConfig, RetryConfigBuilder,
};
pub use validation::ValidationError;
