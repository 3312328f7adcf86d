//! NUMA Node Resource Report
//!
//! Output records of the accountant, one per NUMA node. Free values are
//! signed: an over-committed node reports a negative amount.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// Memory
// =============================================================================

/// General (non-hugepage) memory of a node, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralMemoryResources {
    pub allocated: u64,
    pub free: i64,
}

/// Hugepage memory of a node, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HugepagesResources {
    pub page_size: u64,
    pub allocated: u64,
    pub free: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResources {
    pub general: GeneralMemoryResources,
    /// Empty when the node has no hugepage reservation
    pub hugepages: Vec<HugepagesResources>,
}

// =============================================================================
// Cores
// =============================================================================

/// Core IDs of a node, both lists sorted and disjoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoresResources {
    pub allocated: Vec<u32>,
    pub free: Vec<u32>,
}

// =============================================================================
// Guests and Interfaces
// =============================================================================

/// A guest NIC bound to a host interface on the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNetworkResources {
    pub host_nic_id: u64,
    pub guest_nic_id: Option<u64>,
}

/// What one guest uses on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNodeResources {
    pub identifier: String,
    pub system_id: Option<String>,
    pub pinned_cores: Vec<u32>,
    pub networks: Vec<VmNetworkResources>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFunctionResources {
    pub allocated: u32,
    pub free: i64,
}

/// SR-IOV usage of a host interface attached to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInterfaceResources {
    pub id: u64,
    pub name: String,
    pub virtual_functions: VirtualFunctionResources,
}

// =============================================================================
// Node Report
// =============================================================================

/// Capacity report for one NUMA node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumaNodeResources {
    pub node_id: u32,
    pub memory: MemoryResources,
    pub cores: CoresResources,
    pub vms: Vec<VmNodeResources>,
    pub interfaces: Vec<HostInterfaceResources>,
}

impl NumaNodeResources {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            memory: MemoryResources::default(),
            cores: CoresResources::default(),
            vms: Vec::new(),
            interfaces: Vec::new(),
        }
    }
}

// =============================================================================
// Host Summary
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSummary {
    pub allocated: u64,
    pub free: i64,
}

impl CountSummary {
    fn add(&mut self, allocated: u64, free: i64) {
        self.allocated = self.allocated.saturating_add(allocated);
        self.free = self.free.saturating_add(free);
    }
}

/// Whole-host totals folded from the node reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResourceSummary {
    pub cores: CountSummary,
    pub general_memory: CountSummary,
    pub hugepages: CountSummary,
    pub virtual_functions: CountSummary,
    /// Distinct guests present on any node
    pub vm_count: usize,
}

/// Add up a per-node report
pub fn summarize(nodes: &[NumaNodeResources]) -> HostResourceSummary {
    let mut summary = HostResourceSummary::default();
    let mut guests = BTreeSet::new();

    for node in nodes {
        summary.cores.add(
            node.cores.allocated.len() as u64,
            node.cores.free.len() as i64,
        );
        summary
            .general_memory
            .add(node.memory.general.allocated, node.memory.general.free);
        for hugepages in &node.memory.hugepages {
            summary.hugepages.add(hugepages.allocated, hugepages.free);
        }
        for iface in &node.interfaces {
            summary.virtual_functions.add(
                iface.virtual_functions.allocated as u64,
                iface.virtual_functions.free,
            );
        }
        guests.extend(node.vms.iter().map(|vm| vm.identifier.as_str()));
    }

    summary.vm_count = guests.len();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        let mut node0 = NumaNodeResources::new(0);
        node0.cores = CoresResources {
            allocated: vec![0, 1],
            free: vec![2, 3],
        };
        node0.memory.general = GeneralMemoryResources {
            allocated: 100,
            free: 900,
        };
        node0.vms.push(VmNodeResources {
            identifier: "vm0".into(),
            system_id: None,
            pinned_cores: vec![0, 1],
            networks: vec![],
        });

        let mut node1 = NumaNodeResources::new(1);
        node1.cores.free = vec![4, 5];
        node1.memory.general.free = -50;
        node1.memory.hugepages.push(HugepagesResources {
            page_size: 2048,
            allocated: 4096,
            free: 0,
        });
        node1.interfaces.push(HostInterfaceResources {
            id: 3,
            name: "eth0".into(),
            virtual_functions: VirtualFunctionResources {
                allocated: 1,
                free: 7,
            },
        });
        node1.vms.push(VmNodeResources {
            identifier: "vm0".into(),
            system_id: None,
            pinned_cores: vec![],
            networks: vec![VmNetworkResources {
                host_nic_id: 3,
                guest_nic_id: Some(9),
            }],
        });

        let summary = summarize(&[node0, node1]);
        assert_eq!(summary.cores, CountSummary { allocated: 2, free: 4 });
        assert_eq!(summary.general_memory, CountSummary { allocated: 100, free: 850 });
        assert_eq!(summary.hugepages, CountSummary { allocated: 4096, free: 0 });
        assert_eq!(summary.virtual_functions, CountSummary { allocated: 1, free: 7 });
        assert_eq!(summary.vm_count, 1);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let node = NumaNodeResources::new(2);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["nodeId"], 2);
        assert!(value.get("node_id").is_none());
        assert_eq!(value["memory"]["general"]["free"], 0);
        assert!(value["memory"]["hugepages"].as_array().unwrap().is_empty());

        let summary = serde_json::to_value(HostResourceSummary::default()).unwrap();
        assert_eq!(summary["vmCount"], 0);
        assert_eq!(summary["generalMemory"]["allocated"], 0);
    }
}
