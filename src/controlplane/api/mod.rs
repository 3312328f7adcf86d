//! API Module
//!
//! REST API over the pod inventory, NUMA accounting and pod discovery.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
