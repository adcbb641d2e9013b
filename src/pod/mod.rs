//! Worker (pod) model and the labelled state the breaker manages.
//!
//! # Data Flow
//! ```text
//! Cluster listing (PodList wire shape)
//!     → model.rs (Pod, metadata, readiness/phase)
//!     → traffic.rs (traffic flag + owning strategy labels)
//!     → bookkeeping.rs (breakAt / retryCount annotations)
//!     → selector.rs (which pods a component looks at)
//! ```
//!
//! # Design Decisions
//! - Pods are plain values; every mutation produces a patched copy
//! - Unknown fields of the wire shape are ignored on read
//! - Absence of the traffic label is the "unmanaged" state, not an error

pub mod bookkeeping;
pub mod model;
pub mod selector;
pub mod traffic;

pub use bookkeeping::{Bookkeeping, BookkeepingError};
pub use model::{MetadataPatch, ObjectMeta, Pod, PodCondition, PodList, PodStatus};
pub use selector::Selector;
pub use traffic::TrafficState;
