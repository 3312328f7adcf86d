//! Pinned-core weights
//!
//! Splits a guest's pinned cores across NUMA nodes. A node's weight is the
//! fraction of the guest's pinned cores that live on it, and the guest's
//! memory is divided in the same proportion.

use crate::domain::models::{HostTopology, VirtualMachine};
use std::collections::{BTreeMap, BTreeSet};

/// The part of a guest's pinned cores that landed on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeShare {
    /// Position of the node in index order
    pub slot: usize,
    /// Guest cores found on the node
    pub cores: BTreeSet<u32>,
    /// Number of distinct pinned cores of the guest
    pub total: usize,
}

impl NodeShare {
    pub fn weight(&self) -> f64 {
        self.cores.len() as f64 / self.total as f64
    }

    /// `memory * |cores| / total`, floored, without float rounding
    pub fn memory_share(&self, memory: u64) -> u64 {
        (memory as u128 * self.cores.len() as u128 / self.total as u128) as u64
    }
}

/// Result of splitting a guest's pinned cores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreSplit {
    pub shares: Vec<NodeShare>,
    /// Pinned cores found on no node
    pub unmatched: BTreeSet<u32>,
}

/// Assign `pinned` cores to nodes visited in order.
///
/// Each node claims the pinned cores it owns that no earlier node claimed.
/// The walk stops as soon as every pinned core is assigned.
pub fn split_pinned_cores<'a, I>(pinned: &BTreeSet<u32>, nodes: I) -> CoreSplit
where
    I: IntoIterator<Item = &'a BTreeSet<u32>>,
{
    let total = pinned.len();
    let mut remaining = pinned.clone();
    let mut shares = Vec::new();

    for (slot, node_cores) in nodes.into_iter().enumerate() {
        if remaining.is_empty() {
            break;
        }
        let common: BTreeSet<u32> = remaining.intersection(node_cores).copied().collect();
        if common.is_empty() {
            continue;
        }
        remaining.retain(|core| !common.contains(core));
        shares.push(NodeShare {
            slot,
            cores: common,
            total,
        });
    }

    CoreSplit {
        shares,
        unmatched: remaining,
    }
}

/// Per-node weights of a guest, keyed by NUMA index
pub fn numa_weights(vm: &VirtualMachine, topology: &HostTopology) -> BTreeMap<u32, f64> {
    let nodes = topology.ordered_nodes();
    let core_sets: Vec<BTreeSet<u32>> = nodes
        .iter()
        .map(|node| node.cores.iter().copied().collect())
        .collect();

    split_pinned_cores(&vm.pinned_core_set(), &core_sets)
        .shares
        .into_iter()
        .map(|share| (nodes[share.slot].index, share.weight()))
        .collect()
}
