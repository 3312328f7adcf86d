//! Hardware Module
//!
//! Host topology accounting for the VM host control plane.

pub mod numa;

pub use numa::*;
