//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breaker / Activator / GC / Supervisor produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (decision counters, violator gauge)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (pod, strategy, service) on every decision
//! - Counters are recorded through the `metrics` facade; without an
//!   installed recorder they are no-ops, which keeps tests quiet

pub mod logging;
pub mod metrics;
