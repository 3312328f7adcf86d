//! NUMA Accountant
//!
//! Folds the guests of a pod over its host topology and reports, per NUMA
//! node, which cores, memory, hugepages and SR-IOV virtual functions are in
//! use. The computation is pure: no I/O, no shared state.

use super::policy::{AccountingConfig, PinningPolicy};
use super::resources::{
    CoresResources, GeneralMemoryResources, HostInterfaceResources, HugepagesResources,
    MemoryResources, NumaNodeResources, VirtualFunctionResources, VmNetworkResources,
    VmNodeResources,
};
use super::weights::split_pinned_cores;
use crate::domain::models::{
    HostTopology, InterfaceAttachType, NumaNode, PodSnapshot, VirtualMachine,
    VirtualMachineInterface,
};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// =============================================================================
// Accountant
// =============================================================================

/// Computes NUMA capacity reports for pod snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct NumaAccountant {
    config: AccountingConfig,
}

impl NumaAccountant {
    pub fn new(config: AccountingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AccountingConfig {
        &self.config
    }

    /// Validate the snapshot, apply the pinning policy and account it
    pub fn compute(&self, snapshot: &PodSnapshot) -> Result<Vec<NumaNodeResources>> {
        snapshot.validate()?;
        if self.config.pinning == PinningPolicy::Strict {
            check_pinning_conflicts(&snapshot.virtual_machines)?;
        }
        Ok(get_vm_host_resources(snapshot))
    }
}

/// Reject two guests pinned to the same host core
fn check_pinning_conflicts(vms: &[VirtualMachine]) -> Result<()> {
    let mut owners: BTreeMap<u32, &str> = BTreeMap::new();
    for vm in vms {
        for core in vm.pinned_core_set() {
            if let Some(first) = owners.insert(core, &vm.identifier) {
                return Err(Error::PinnedCoreConflict {
                    core,
                    first: first.to_string(),
                    second: vm.identifier.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Per-node capacity report of a pod, ascending by NUMA index.
///
/// Empty when the pod host has no known topology.
pub fn get_vm_host_resources(snapshot: &PodSnapshot) -> Vec<NumaNodeResources> {
    let topology = match &snapshot.topology {
        Some(topology) => topology,
        None => return Vec::new(),
    };

    let mut interfaces_by_vm: BTreeMap<u64, Vec<&VirtualMachineInterface>> = BTreeMap::new();
    for iface in &snapshot.vm_interfaces {
        interfaces_by_vm.entry(iface.vm_id).or_default().push(iface);
    }
    for interfaces in interfaces_by_vm.values_mut() {
        interfaces.sort_by_key(|iface| iface.id);
    }

    snapshot
        .virtual_machines
        .iter()
        .fold(HostState::new(topology), |state, vm| {
            let interfaces = interfaces_by_vm
                .get(&vm.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            state.absorb(vm, interfaces)
        })
        .finish()
}

// =============================================================================
// Fold State
// =============================================================================

struct NodeState<'a> {
    node: &'a NumaNode,
    cores: BTreeSet<u32>,
    free: BTreeSet<u32>,
    general_allocated: u64,
    hugepages_allocated: u64,
    vms: Vec<VmNodeResources>,
}

struct HostState<'a> {
    topology: &'a HostTopology,
    /// Nodes in ascending index order
    nodes: Vec<NodeState<'a>>,
    /// Host interface ID to node slot
    interface_slots: BTreeMap<u64, usize>,
    allocated_vfs: BTreeMap<u64, u32>,
}

impl<'a> HostState<'a> {
    fn new(topology: &'a HostTopology) -> Self {
        let nodes: Vec<NodeState<'a>> = topology
            .ordered_nodes()
            .into_iter()
            .map(|node| {
                let cores: BTreeSet<u32> = node.cores.iter().copied().collect();
                NodeState {
                    node,
                    free: cores.clone(),
                    cores,
                    general_allocated: 0,
                    hugepages_allocated: 0,
                    vms: Vec::new(),
                }
            })
            .collect();

        let slots: BTreeMap<u32, usize> = nodes
            .iter()
            .enumerate()
            .map(|(slot, state)| (state.node.index, slot))
            .collect();
        let interface_slots = topology
            .interfaces
            .iter()
            .filter_map(|iface| slots.get(&iface.numa_index).map(|slot| (iface.id, *slot)))
            .collect();

        Self {
            topology,
            nodes,
            interface_slots,
            allocated_vfs: BTreeMap::new(),
        }
    }

    fn absorb(mut self, vm: &VirtualMachine, interfaces: &[&VirtualMachineInterface]) -> Self {
        let core_sets: Vec<&BTreeSet<u32>> = self.nodes.iter().map(|state| &state.cores).collect();
        let split = split_pinned_cores(&vm.pinned_core_set(), core_sets);
        if !split.unmatched.is_empty() {
            warn!(
                "VM {} is pinned to cores {:?} that are on no NUMA node",
                vm.identifier, split.unmatched
            );
        }

        let mut pinned_by_slot: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
        for share in split.shares {
            let state = &mut self.nodes[share.slot];
            let memory = share.memory_share(vm.memory);

            if vm.hugepages_backed {
                match state.node.hugepages {
                    Some(hugepages) => {
                        let rounded = match hugepages.page_size {
                            0 => memory,
                            page => memory.div_ceil(page) * page,
                        };
                        state.hugepages_allocated = state.hugepages_allocated.saturating_add(rounded);
                    }
                    None => debug!(
                        "VM {} is hugepage backed but NUMA node {} has no hugepages",
                        vm.identifier, state.node.index
                    ),
                }
            } else {
                state.general_allocated = state.general_allocated.saturating_add(memory);
            }

            state.free.retain(|core| !share.cores.contains(core));
            pinned_by_slot.insert(share.slot, share.cores.into_iter().collect());
        }

        let mut networks_by_slot: BTreeMap<usize, Vec<VmNetworkResources>> = BTreeMap::new();
        for iface in interfaces {
            let host_nic_id = match iface.host_interface_id {
                Some(id) => id,
                None => continue,
            };
            let slot = match self.interface_slots.get(&host_nic_id) {
                Some(slot) => *slot,
                None => {
                    debug!(
                        "VM {} interface {} is bound to unknown host interface {}",
                        vm.identifier, iface.id, host_nic_id
                    );
                    continue;
                }
            };

            networks_by_slot.entry(slot).or_default().push(VmNetworkResources {
                host_nic_id,
                guest_nic_id: Some(iface.id),
            });
            if iface.attachment_type == InterfaceAttachType::Sriov {
                *self.allocated_vfs.entry(host_nic_id).or_default() += 1;
            }
        }

        for (slot, state) in self.nodes.iter_mut().enumerate() {
            let pinned_cores = pinned_by_slot.remove(&slot).unwrap_or_default();
            let networks = networks_by_slot.remove(&slot).unwrap_or_default();
            if pinned_cores.is_empty() && networks.is_empty() {
                continue;
            }
            state.vms.push(VmNodeResources {
                identifier: vm.identifier.clone(),
                system_id: vm.machine_system_id.clone(),
                pinned_cores,
                networks,
            });
        }

        self
    }

    fn finish(self) -> Vec<NumaNodeResources> {
        let topology = self.topology;
        let allocated_vfs = self.allocated_vfs;

        self.nodes
            .into_iter()
            .map(|state| {
                let node = state.node;
                let reserved = node.hugepages.map(|h| h.total).unwrap_or_default();
                let hugepages = node
                    .hugepages
                    .map(|h| HugepagesResources {
                        page_size: h.page_size,
                        allocated: state.hugepages_allocated,
                        free: signed_diff(h.total, state.hugepages_allocated),
                    })
                    .into_iter()
                    .collect();

                let interfaces = topology
                    .interfaces_on(node.index)
                    .into_iter()
                    .map(|iface| {
                        let allocated = allocated_vfs.get(&iface.id).copied().unwrap_or_default();
                        HostInterfaceResources {
                            id: iface.id,
                            name: iface.name.clone(),
                            virtual_functions: VirtualFunctionResources {
                                allocated,
                                free: signed_diff(iface.sriov_max_vf as u64, allocated as u64),
                            },
                        }
                    })
                    .collect();

                NumaNodeResources {
                    node_id: node.index,
                    memory: MemoryResources {
                        general: GeneralMemoryResources {
                            allocated: state.general_allocated,
                            free: signed_diff(
                                node.memory,
                                state.general_allocated.saturating_add(reserved),
                            ),
                        },
                        hugepages,
                    },
                    cores: CoresResources {
                        allocated: state.cores.difference(&state.free).copied().collect(),
                        free: state.free.into_iter().collect(),
                    },
                    vms: state.vms,
                    interfaces,
                }
            })
            .collect()
    }
}

/// `total - used` as a signed value, clamped to the i64 range
fn signed_diff(total: u64, used: u64) -> i64 {
    (total as i128 - used as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        CoreAllocation, HostInterface, NumaNodeHugepages, Pod, PodContext, MIB,
    };
    use crate::hardware::numa::weights::numa_weights;
    use assert_matches::assert_matches;

    fn node(index: u32, cores: &[u32], memory_mib: u64) -> NumaNode {
        NumaNode {
            index,
            cores: cores.to_vec(),
            memory: memory_mib * MIB,
            hugepages: None,
        }
    }

    fn with_hugepages(mut node: NumaNode, page_mib: u64, total_mib: u64) -> NumaNode {
        node.hugepages = Some(NumaNodeHugepages {
            page_size: page_mib * MIB,
            total: total_mib * MIB,
        });
        node
    }

    fn snapshot(nodes: Vec<NumaNode>, interfaces: Vec<HostInterface>) -> PodSnapshot {
        let mut snapshot = PodSnapshot::new(Pod {
            id: 1,
            name: "pod".into(),
            pod_type: "lxd".into(),
            context: PodContext::new(),
            host_system_id: Some("host".into()),
        });
        snapshot.topology = Some(HostTopology {
            numa_nodes: nodes,
            interfaces,
        });
        snapshot
    }

    fn pinned_vm(id: u64, system_id: &str, cores: &[u32], memory_mib: u64) -> VirtualMachine {
        VirtualMachine::new(id, 1, format!("vm{}", id))
            .with_cores(CoreAllocation::Pinned(cores.to_vec()))
            .with_memory(memory_mib * MIB)
            .with_machine(system_id)
    }

    fn assert_invariants(snapshot: &PodSnapshot, report: &[NumaNodeResources]) {
        let topology = snapshot.topology.as_ref().unwrap();
        for (node, resources) in topology.ordered_nodes().into_iter().zip(report) {
            assert_eq!(node.index, resources.node_id);

            let mut all: Vec<u32> = resources
                .cores
                .allocated
                .iter()
                .chain(&resources.cores.free)
                .copied()
                .collect();
            all.sort();
            let mut expected = node.cores.clone();
            expected.sort();
            expected.dedup();
            assert_eq!(all, expected);

            let reserved = node.hugepages.map(|h| h.total).unwrap_or_default() as i64;
            assert_eq!(
                resources.memory.general.allocated as i64 + resources.memory.general.free + reserved,
                node.memory as i64
            );
        }
    }

    #[test]
    fn test_no_topology() {
        let mut snap = snapshot(vec![], vec![]);
        snap.topology = None;
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[0], 1024));
        assert!(get_vm_host_resources(&snap).is_empty());
    }

    #[test]
    fn test_split_across_nodes() {
        let mut snap = snapshot(
            vec![node(1, &[4, 5, 6, 7], 4096), node(0, &[0, 1, 2, 3], 8192)],
            vec![],
        );
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[0, 1, 4], 300));

        let report = get_vm_host_resources(&snap);
        assert_eq!(report.len(), 2);

        assert_eq!(report[0].node_id, 0);
        assert_eq!(report[0].memory.general.allocated, 200 * MIB);
        assert_eq!(report[0].memory.general.free, ((8192 - 200) * MIB) as i64);
        assert_eq!(report[0].cores.allocated, vec![0, 1]);
        assert_eq!(report[0].cores.free, vec![2, 3]);
        assert_eq!(report[0].vms[0].pinned_cores, vec![0, 1]);
        assert_eq!(report[0].vms[0].system_id.as_deref(), Some("vm1"));

        assert_eq!(report[1].node_id, 1);
        assert_eq!(report[1].memory.general.allocated, 100 * MIB);
        assert_eq!(report[1].cores.free, vec![5, 6, 7]);
        assert_eq!(report[1].vms[0].pinned_cores, vec![4]);

        let weights = numa_weights(&snap.virtual_machines[0], snap.topology.as_ref().unwrap());
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);

        assert_invariants(&snap, &report);
    }

    #[test]
    fn test_aligned() {
        let mut snap = snapshot(
            vec![node(0, &[0, 3], 4096), node(1, &[1, 4], 1024), node(2, &[2, 5], 2048)],
            vec![],
        );
        snap.virtual_machines.push(pinned_vm(1, "vm0", &[0], 1024));
        snap.virtual_machines.push(pinned_vm(2, "vm1", &[2, 5], 1024));

        let report = get_vm_host_resources(&snap);

        assert_eq!(report[0].cores, CoresResources { allocated: vec![0], free: vec![3] });
        assert_eq!(
            report[0].memory.general,
            GeneralMemoryResources { allocated: 1024 * MIB, free: (3072 * MIB) as i64 }
        );
        assert_eq!(report[1].cores, CoresResources { allocated: vec![], free: vec![1, 4] });
        assert!(report[1].vms.is_empty());
        assert_eq!(report[1].memory.general.free, (1024 * MIB) as i64);
        assert_eq!(report[2].cores.allocated, vec![2, 5]);
        assert_eq!(report[2].memory.general.free, (1024 * MIB) as i64);
        assert_eq!(report[2].vms[0].system_id.as_deref(), Some("vm1"));

        assert_invariants(&snap, &report);
    }

    #[test]
    fn test_unaligned_hugepages() {
        let mut snap = snapshot(
            vec![
                with_hugepages(node(0, &[0, 1], 4096), 1024, 1024),
                with_hugepages(node(1, &[2, 3], 4096), 1024, 4096),
            ],
            vec![],
        );
        snap.virtual_machines
            .push(pinned_vm(1, "vm0", &[0, 2], 2048).with_hugepages(true));

        let report = get_vm_host_resources(&snap);

        assert_eq!(report[0].memory.general, GeneralMemoryResources { allocated: 0, free: (3072 * MIB) as i64 });
        assert_eq!(
            report[0].memory.hugepages,
            vec![HugepagesResources { page_size: 1024 * MIB, allocated: 1024 * MIB, free: 0 }]
        );
        assert_eq!(report[1].memory.general, GeneralMemoryResources { allocated: 0, free: 0 });
        assert_eq!(
            report[1].memory.hugepages,
            vec![HugepagesResources {
                page_size: 1024 * MIB,
                allocated: 1024 * MIB,
                free: (3072 * MIB) as i64
            }]
        );

        assert_invariants(&snap, &report);
    }

    #[test]
    fn test_hugepages_round_up_to_page() {
        let mut snap = snapshot(
            vec![
                with_hugepages(node(0, &[0, 1], 4096), 2048, 4096),
                with_hugepages(node(1, &[2, 3], 8192), 4096, 8192),
            ],
            vec![],
        );
        snap.virtual_machines
            .push(pinned_vm(1, "vm0", &[0, 2], 2048).with_hugepages(true));

        let report = get_vm_host_resources(&snap);
        assert_eq!(report[0].memory.hugepages[0].allocated, 2048 * MIB);
        assert_eq!(report[0].memory.hugepages[0].free, (2048 * MIB) as i64);
        assert_eq!(report[1].memory.hugepages[0].allocated, 4096 * MIB);
        assert_eq!(report[1].memory.hugepages[0].free, (4096 * MIB) as i64);
    }

    #[test]
    fn test_hugepage_ceiling_boundaries() {
        let page = 2 * MIB;
        let exact = snapshot(
            vec![with_hugepages(node(0, &[0], 1024), 2, 1024)],
            vec![],
        );

        let mut snap = exact.clone();
        snap.virtual_machines.push(
            VirtualMachine::new(1, 1, "exact")
                .with_cores(CoreAllocation::Pinned(vec![0]))
                .with_memory(page)
                .with_hugepages(true),
        );
        assert_eq!(get_vm_host_resources(&snap)[0].memory.hugepages[0].allocated, page);

        let mut snap = exact;
        snap.virtual_machines.push(
            VirtualMachine::new(1, 1, "over")
                .with_cores(CoreAllocation::Pinned(vec![0]))
                .with_memory(page + 1)
                .with_hugepages(true),
        );
        assert_eq!(get_vm_host_resources(&snap)[0].memory.hugepages[0].allocated, 2 * page);
    }

    #[test]
    fn test_hugepage_backed_without_reservation() {
        let mut snap = snapshot(vec![node(0, &[0, 1], 1024)], vec![]);
        snap.virtual_machines
            .push(pinned_vm(1, "vm0", &[0], 512).with_hugepages(true));

        let report = get_vm_host_resources(&snap);
        assert_eq!(report[0].memory.general.allocated, 0);
        assert!(report[0].memory.hugepages.is_empty());
        assert_eq!(report[0].cores.allocated, vec![0]);
    }

    #[test]
    fn test_sriov_virtual_functions() {
        let mut snap = snapshot(
            vec![node(0, &[0, 1], 1024), node(1, &[2, 3], 1024)],
            vec![
                HostInterface { id: 20, name: "eth1".into(), numa_index: 1, sriov_max_vf: 0 },
                HostInterface { id: 10, name: "eth0".into(), numa_index: 1, sriov_max_vf: 4 },
            ],
        );
        snap.virtual_machines.push(
            VirtualMachine::new(1, 1, "vm1")
                .with_cores(CoreAllocation::Unpinned(2))
                .with_memory(256 * MIB),
        );
        snap.virtual_machines.push(VirtualMachine::new(2, 1, "vm2"));
        for (id, vm_id, attachment_type) in [
            (100, 1, InterfaceAttachType::Sriov),
            (101, 2, InterfaceAttachType::Sriov),
            (102, 2, InterfaceAttachType::Bridge),
        ] {
            snap.vm_interfaces.push(VirtualMachineInterface {
                id,
                vm_id,
                mac_address: None,
                host_interface_id: Some(10),
                attachment_type,
            });
        }
        snap.vm_interfaces.push(VirtualMachineInterface {
            id: 103,
            vm_id: 2,
            mac_address: None,
            host_interface_id: None,
            attachment_type: InterfaceAttachType::Sriov,
        });

        let report = get_vm_host_resources(&snap);

        assert!(report[0].interfaces.is_empty());
        assert!(report[0].vms.is_empty());

        let interfaces = &report[1].interfaces;
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].id, 10);
        assert_eq!(interfaces[0].virtual_functions, VirtualFunctionResources { allocated: 2, free: 2 });
        assert_eq!(interfaces[1].id, 20);
        assert_eq!(interfaces[1].virtual_functions, VirtualFunctionResources { allocated: 0, free: 0 });

        // Unpinned guests show up through their NICs only
        assert_eq!(report[1].vms.len(), 2);
        assert_eq!(report[1].vms[0].identifier, "vm1");
        assert!(report[1].vms[0].pinned_cores.is_empty());
        assert_eq!(
            report[1].vms[1].networks,
            vec![
                VmNetworkResources { host_nic_id: 10, guest_nic_id: Some(101) },
                VmNetworkResources { host_nic_id: 10, guest_nic_id: Some(102) },
            ]
        );
        assert_eq!(report[1].memory.general.allocated, 0);
        assert_eq!(report[1].cores.free, vec![2, 3]);
    }

    #[test]
    fn test_over_commit_goes_negative() {
        let mut snap = snapshot(
            vec![node(0, &[0], 1024)],
            vec![HostInterface { id: 1, name: "eth0".into(), numa_index: 0, sriov_max_vf: 1 }],
        );
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[0], 2048));
        for id in [10, 11] {
            snap.vm_interfaces.push(VirtualMachineInterface {
                id,
                vm_id: 1,
                mac_address: None,
                host_interface_id: Some(1),
                attachment_type: InterfaceAttachType::Sriov,
            });
        }

        let report = get_vm_host_resources(&snap);
        assert_eq!(report[0].memory.general.free, -((1024 * MIB) as i64));
        assert_eq!(report[0].interfaces[0].virtual_functions.free, -1);
    }

    #[test]
    fn test_unmatched_cores_are_dropped() {
        let mut snap = snapshot(vec![node(0, &[0, 1], 1024)], vec![]);
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[1, 9], 100));

        let report = get_vm_host_resources(&snap);
        assert_eq!(report[0].memory.general.allocated, 50 * MIB);
        assert_eq!(report[0].cores.allocated, vec![1]);

        let weights = numa_weights(&snap.virtual_machines[0], snap.topology.as_ref().unwrap());
        assert_eq!(weights.get(&0), Some(&0.5));
    }

    #[test]
    fn test_idempotent() {
        let mut snap = snapshot(
            vec![node(0, &[0, 1, 2, 3], 8192), node(1, &[4, 5, 6, 7], 4096)],
            vec![],
        );
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[0, 4], 512));
        snap.virtual_machines.push(pinned_vm(2, "vm2", &[1, 2, 5], 900));

        let first = get_vm_host_resources(&snap);
        let second = get_vm_host_resources(&snap);
        assert_eq!(first, second);
        assert_invariants(&snap, &first);
    }

    #[test]
    fn test_overlapping_pins() {
        let mut snap = snapshot(vec![node(0, &[0, 1, 2, 3], 4096)], vec![]);
        snap.virtual_machines.push(pinned_vm(1, "vm1", &[0, 1], 100));
        snap.virtual_machines.push(pinned_vm(2, "vm2", &[1, 2], 100));

        let lenient = NumaAccountant::default().compute(&snap).unwrap();
        assert_eq!(lenient[0].cores.allocated, vec![0, 1, 2]);
        assert_eq!(lenient[0].memory.general.allocated, 200 * MIB);

        let strict = NumaAccountant::new(AccountingConfig::strict()).compute(&snap);
        assert_matches!(
            strict,
            Err(Error::PinnedCoreConflict { core: 1, ref first, ref second })
                if first == "vm1" && second == "vm2"
        );
    }

    #[test]
    fn test_compute_validates_snapshot() {
        let mut snap = snapshot(vec![node(0, &[0], 1024)], vec![]);
        let mut vm = pinned_vm(1, "vm1", &[0], 100);
        vm.unpinned_cores = 1;
        snap.virtual_machines.push(vm);

        assert_matches!(
            NumaAccountant::default().compute(&snap),
            Err(Error::InvalidVirtualMachine { .. })
        );
    }
}
