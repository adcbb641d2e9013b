//! Metric-driven pod circuit breaker library

pub mod activator;
pub mod anomaly;
pub mod breaker;
pub mod cluster;
pub mod config;
pub mod gc;
pub mod lifecycle;
pub mod observability;
pub mod pod;
pub mod query;
pub mod supervisor;

pub use config::schema::ControllerConfig;
pub use lifecycle::shutdown::Shutdown;
pub use supervisor::ServiceSupervisor;
