//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControllerConfig (validated, immutable)
//!     → supervisor builds one breaker per strategy, activators and a GC per service
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → supervisor reconciles: only changed components restart
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A config that fails validation never replaces the running one

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ActivatorConfig, ActivatorMode, BreakerStrategyConfig, ClusterConfig,
    ContinuousValueDeviationConfig, ControllerConfig, CustomServiceConfig, DetectorConfig,
    DiscreteValueOutOfListConfig, GcConfig, MetricSourceConfig, ObservabilityConfig,
    ServiceConfig,
};
pub use validation::{validate_config, ValidationError};
