//! Pod, guest and host topology models
//!
//! Read-only snapshot types handed to the coordinator and the accountant.
//! Memory sizes are always in bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One mebibyte in bytes
pub const MIB: u64 = 1024 * 1024;

/// Highest host core ID accepted in a CPU limit
pub const MAX_CORE_ID: u32 = 8191;

/// Opaque driver connection data (credentials, URLs, project names, ...)
pub type PodContext = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Pod
// =============================================================================

/// A VM host exposed over RPC by a remote pod driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Database ID of the pod
    pub id: u64,
    /// Pod name
    pub name: String,
    /// Driver type tag (e.g. `lxd`, `virsh`)
    pub pod_type: String,
    /// Driver connection context
    #[serde(default)]
    pub context: PodContext,
    /// System ID of the machine hosting the pod, once known
    #[serde(default)]
    pub host_system_id: Option<String>,
}

/// OAuth credentials a pod host uses to post commissioning data back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCredentials {
    pub consumer_key: String,
    pub token_key: String,
    pub token_secret: String,
}

// =============================================================================
// Core Allocation
// =============================================================================

/// How a guest's vCPUs are placed on host cores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreAllocation {
    /// Floating vCPUs, scheduled anywhere on the host
    Unpinned(u32),
    /// vCPUs pinned to these host core IDs (sorted, distinct)
    Pinned(Vec<u32>),
}

impl CoreAllocation {
    /// Parse a driver CPU limit string.
    ///
    /// An empty string means one unpinned vCPU, a bare integer is an unpinned
    /// count, and anything else is a comma separated list of core IDs and
    /// inclusive ranges, e.g. `0-3,7`.
    pub fn parse(limits: &str) -> Result<Self> {
        let limits = limits.trim();
        if limits.is_empty() {
            return Ok(CoreAllocation::Unpinned(1));
        }
        if let Ok(count) = limits.parse::<u32>() {
            return Ok(CoreAllocation::Unpinned(count));
        }

        let parse_core = |value: &str| -> Result<u32> {
            let core = value.trim().parse::<u32>().map_err(|e| Error::CoreListParse {
                input: limits.to_string(),
                reason: format!("'{}': {}", value.trim(), e),
            })?;
            if core > MAX_CORE_ID {
                return Err(Error::CoreListParse {
                    input: limits.to_string(),
                    reason: format!("core {} is above {}", core, MAX_CORE_ID),
                });
            }
            Ok(core)
        };

        let mut cores = BTreeSet::new();
        for range in limits.split(',') {
            match range.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse_core(start)?, parse_core(end)?);
                    if start > end {
                        return Err(Error::CoreListParse {
                            input: limits.to_string(),
                            reason: format!("range {}-{} is reversed", start, end),
                        });
                    }
                    cores.extend(start..=end);
                }
                None => {
                    cores.insert(parse_core(range)?);
                }
            }
        }

        Ok(CoreAllocation::Pinned(cores.into_iter().collect()))
    }
}

// =============================================================================
// Virtual Machines
// =============================================================================

/// A guest machine running on a pod.
///
/// Core placement may be given either as `pinned_cores`/`unpinned_cores` or
/// as a driver CPU limit (`cpu_limit`, also accepted as `limits.cpu`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VirtualMachineRecord")]
pub struct VirtualMachine {
    pub id: u64,
    /// Pod the guest runs on
    pub pod_id: u64,
    /// Driver-side identifier (instance name)
    pub identifier: String,
    /// Host cores the guest is pinned to
    pub pinned_cores: Vec<u32>,
    /// Number of floating vCPUs
    pub unpinned_cores: u32,
    /// Memory size in bytes
    pub memory: u64,
    /// Whether guest memory is backed by hugepages
    pub hugepages_backed: bool,
    /// System ID of the machine record owning this guest, if any
    pub machine_system_id: Option<String>,
}

/// Stored form of a guest, before the CPU limit is resolved
#[derive(Deserialize)]
struct VirtualMachineRecord {
    id: u64,
    pod_id: u64,
    identifier: String,
    #[serde(default)]
    pinned_cores: Vec<u32>,
    #[serde(default)]
    unpinned_cores: u32,
    #[serde(default, alias = "limits.cpu")]
    cpu_limit: Option<String>,
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    hugepages_backed: bool,
    #[serde(default)]
    machine_system_id: Option<String>,
}

impl TryFrom<VirtualMachineRecord> for VirtualMachine {
    type Error = Error;

    fn try_from(record: VirtualMachineRecord) -> Result<Self> {
        let vm = VirtualMachine {
            id: record.id,
            pod_id: record.pod_id,
            identifier: record.identifier,
            pinned_cores: record.pinned_cores,
            unpinned_cores: record.unpinned_cores,
            memory: record.memory,
            hugepages_backed: record.hugepages_backed,
            machine_system_id: record.machine_system_id,
        };

        match record.cpu_limit {
            None => Ok(vm),
            Some(_) if !vm.pinned_cores.is_empty() || vm.unpinned_cores > 0 => {
                Err(Error::InvalidVirtualMachine {
                    identifier: vm.identifier,
                    reason: "cpu_limit can't be combined with explicit cores".into(),
                })
            }
            Some(limit) => Ok(vm.with_cores(CoreAllocation::parse(&limit)?)),
        }
    }
}

impl VirtualMachine {
    /// Create an unpinned guest with no memory
    pub fn new(id: u64, pod_id: u64, identifier: impl Into<String>) -> Self {
        Self {
            id,
            pod_id,
            identifier: identifier.into(),
            pinned_cores: Vec::new(),
            unpinned_cores: 0,
            memory: 0,
            hugepages_backed: false,
            machine_system_id: None,
        }
    }

    /// Replace the guest's core placement
    pub fn with_cores(mut self, allocation: CoreAllocation) -> Self {
        match allocation {
            CoreAllocation::Unpinned(count) => {
                self.pinned_cores.clear();
                self.unpinned_cores = count;
            }
            CoreAllocation::Pinned(cores) => {
                self.pinned_cores = cores;
                self.unpinned_cores = 0;
            }
        }
        self
    }

    pub fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_hugepages(mut self, backed: bool) -> Self {
        self.hugepages_backed = backed;
        self
    }

    pub fn with_machine(mut self, system_id: impl Into<String>) -> Self {
        self.machine_system_id = Some(system_id.into());
        self
    }

    /// Distinct pinned core IDs
    pub fn pinned_core_set(&self) -> BTreeSet<u32> {
        self.pinned_cores.iter().copied().collect()
    }

    /// Pinned and unpinned placement are mutually exclusive
    pub fn validate(&self) -> Result<()> {
        if !self.pinned_cores.is_empty() && self.unpinned_cores > 0 {
            return Err(Error::InvalidVirtualMachine {
                identifier: self.identifier.clone(),
                reason: "can't have both pinned and unpinned cores".into(),
            });
        }
        Ok(())
    }
}

/// How a guest NIC is attached to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceAttachType {
    Bridge,
    Macvlan,
    Network,
    Sriov,
}

impl std::fmt::Display for InterfaceAttachType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceAttachType::Bridge => write!(f, "bridge"),
            InterfaceAttachType::Macvlan => write!(f, "macvlan"),
            InterfaceAttachType::Network => write!(f, "network"),
            InterfaceAttachType::Sriov => write!(f, "sriov"),
        }
    }
}

/// A NIC inside a guest, connected to a host interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineInterface {
    pub id: u64,
    pub vm_id: u64,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Host interface the NIC is bound to
    #[serde(default)]
    pub host_interface_id: Option<u64>,
    pub attachment_type: InterfaceAttachType,
}

// =============================================================================
// Host Topology
// =============================================================================

/// Hugepages reserved on a NUMA node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaNodeHugepages {
    /// Page size in bytes
    pub page_size: u64,
    /// Total bytes reserved for hugepages
    pub total: u64,
}

/// A NUMA node of the pod host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaNode {
    pub index: u32,
    pub cores: Vec<u32>,
    /// Memory in bytes, hugepage reservation included
    pub memory: u64,
    #[serde(default)]
    pub hugepages: Option<NumaNodeHugepages>,
}

/// A physical interface of the pod host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInterface {
    pub id: u64,
    pub name: String,
    /// Index of the NUMA node the NIC is attached to
    pub numa_index: u32,
    #[serde(default)]
    pub sriov_max_vf: u32,
}

/// NUMA nodes and interfaces of a pod host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTopology {
    pub numa_nodes: Vec<NumaNode>,
    #[serde(default)]
    pub interfaces: Vec<HostInterface>,
}

impl HostTopology {
    /// NUMA nodes sorted by index
    pub fn ordered_nodes(&self) -> Vec<&NumaNode> {
        let mut nodes: Vec<&NumaNode> = self.numa_nodes.iter().collect();
        nodes.sort_by_key(|node| node.index);
        nodes
    }

    /// Host interfaces attached to a NUMA node, sorted by ID
    pub fn interfaces_on(&self, numa_index: u32) -> Vec<&HostInterface> {
        let mut interfaces: Vec<&HostInterface> = self
            .interfaces
            .iter()
            .filter(|iface| iface.numa_index == numa_index)
            .collect();
        interfaces.sort_by_key(|iface| iface.id);
        interfaces
    }

    fn validate(&self, pod_id: u64) -> Result<()> {
        let mut indexes = HashSet::new();
        for node in &self.numa_nodes {
            if !indexes.insert(node.index) {
                return Err(Error::InvalidSnapshot {
                    pod_id,
                    reason: format!("duplicate NUMA node index {}", node.index),
                });
            }
            if let Some(hugepages) = node.hugepages {
                if hugepages.page_size == 0 {
                    return Err(Error::InvalidSnapshot {
                        pod_id,
                        reason: format!("NUMA node {} has a zero hugepage size", node.index),
                    });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Pod Snapshot
// =============================================================================

/// Immutable view of a pod, its host topology and its guests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub pod: Pod,
    /// Host topology; absent until the pod host has been commissioned
    #[serde(default)]
    pub topology: Option<HostTopology>,
    #[serde(default)]
    pub virtual_machines: Vec<VirtualMachine>,
    #[serde(default)]
    pub vm_interfaces: Vec<VirtualMachineInterface>,
}

impl PodSnapshot {
    pub fn new(pod: Pod) -> Self {
        Self {
            pod,
            topology: None,
            virtual_machines: Vec::new(),
            vm_interfaces: Vec::new(),
        }
    }

    /// Check the snapshot is internally consistent
    pub fn validate(&self) -> Result<()> {
        let pod_id = self.pod.id;
        if let Some(topology) = &self.topology {
            topology.validate(pod_id)?;
        }

        let mut vm_ids = HashSet::new();
        for vm in &self.virtual_machines {
            vm.validate()?;
            if vm.pod_id != pod_id {
                return Err(Error::InvalidSnapshot {
                    pod_id,
                    reason: format!("virtual machine {} belongs to pod {}", vm.id, vm.pod_id),
                });
            }
            if !vm_ids.insert(vm.id) {
                return Err(Error::InvalidSnapshot {
                    pod_id,
                    reason: format!("duplicate virtual machine id {}", vm.id),
                });
            }
        }

        if let Some(iface) = self
            .vm_interfaces
            .iter()
            .find(|iface| !vm_ids.contains(&iface.vm_id))
        {
            return Err(Error::InvalidSnapshot {
                pod_id,
                reason: format!(
                    "interface {} references unknown virtual machine {}",
                    iface.id, iface.vm_id
                ),
            });
        }

        Ok(())
    }
}
