//! Domain layer - Core types and port definitions
//!
//! This module defines the pod, guest and topology types shared by the
//! coordinator and the accountant, plus the traits (ports) that adapters
//! implement, following hexagonal architecture principles.

pub mod discovered;
pub mod models;
pub mod ports;

pub use discovered::*;
pub use models::*;
pub use ports::*;
