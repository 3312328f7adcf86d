//! Rack controller clients
//!
//! The registry of connected controllers and the HTTP transport.

pub mod http;
pub mod registry;

pub use http::{HttpRackClient, HttpRackClientConfig};
pub use registry::{ClientEvent, RackClientRegistry};
