//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to the transport, coordinator and pipeline at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new client is built for new settings
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::EndpointConfig;
pub use schema::GuardConfig;
pub use schema::LogFormat;
pub use schema::NotifierConfig;
pub use schema::ObservabilityConfig;
pub use schema::QueueConfig;
pub use schema::RefreshConfig;
pub use schema::RetryConfig;
pub use schema::TransportConfig;
