//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build collaborators → Start supervisor
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel root token → Every task exits at its next tick boundary
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Every periodic task holds a child of the root cancellation token
//! - Stopping one component never cancels its siblings
//! - Fail fast: a startup error is fatal, a reload error is not

pub mod shutdown;
pub mod signals;
pub mod startup;
