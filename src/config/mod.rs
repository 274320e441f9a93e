//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SessionConfig (validated, immutable)
//!     → handed to SessionClient::builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new policy means a new client
//! - All fields have defaults to allow minimal configs
//! - Attempt caps, cooldowns and TTL are tunable policy, never constants
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, CacheConfig, DedupConfig, ObservabilityConfig, RefreshPolicy, RetryConfig,
    SessionConfig, StorageConfig,
};
