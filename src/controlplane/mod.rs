//! Control Plane Module
//!
//! Coordinates pod driver calls across the connected rack controllers and
//! exposes the result over REST.

pub mod api;
pub mod classifier;
pub mod clients;
pub mod commands;
pub mod coordinator;
pub mod metrics;

pub use api::*;
pub use classifier::{classify, select_representative, wrap_failure, PodOperation, RemoteErrorKind};
pub use clients::*;
pub use commands::RpcCommand;
pub use coordinator::*;
pub use metrics::CoordinatorMetrics;
