//! NUMA Capacity Accounting
//!
//! Derives per-node core, memory, hugepage and SR-IOV usage of a VM host
//! from its topology and the guests placed on it.

pub mod accountant;
pub mod policy;
pub mod resources;
pub mod weights;

pub use accountant::{get_vm_host_resources, NumaAccountant};
pub use policy::{AccountingConfig, PinningPolicy};
pub use resources::*;
pub use weights::{numa_weights, split_pinned_cores, CoreSplit, NodeShare};
