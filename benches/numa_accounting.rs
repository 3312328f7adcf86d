//! Benchmark for the NUMA accountant
//!
//! Measures a full host report over a synthetic four-node host.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vmhost_control_plane::domain::models::{
    CoreAllocation, HostInterface, HostTopology, InterfaceAttachType, NumaNode, NumaNodeHugepages,
    Pod, PodContext, PodSnapshot, VirtualMachine, VirtualMachineInterface, MIB,
};
use vmhost_control_plane::hardware::numa::{get_vm_host_resources, summarize};

const NODES: u32 = 4;
const CORES_PER_NODE: u32 = 32;

fn host(vm_count: u64) -> PodSnapshot {
    let mut snapshot = PodSnapshot::new(Pod {
        id: 1,
        name: "bench-host".into(),
        pod_type: "lxd".into(),
        context: PodContext::new(),
        host_system_id: None,
    });

    let numa_nodes = (0..NODES)
        .map(|index| NumaNode {
            index,
            cores: (index * CORES_PER_NODE..(index + 1) * CORES_PER_NODE).collect(),
            memory: 256 * 1024 * MIB,
            hugepages: Some(NumaNodeHugepages {
                page_size: 2 * MIB,
                total: 64 * 1024 * MIB,
            }),
        })
        .collect();
    let interfaces = (0..NODES)
        .map(|index| HostInterface {
            id: 1000 + index as u64,
            name: format!("ens{}", index),
            numa_index: index,
            sriov_max_vf: 64,
        })
        .collect();
    snapshot.topology = Some(HostTopology {
        numa_nodes,
        interfaces,
    });

    let total_cores = NODES * CORES_PER_NODE;
    for id in 1..=vm_count {
        let first = (id as u32 * 3) % total_cores;
        let cores = vec![first, (first + CORES_PER_NODE) % total_cores];
        snapshot.virtual_machines.push(
            VirtualMachine::new(id, 1, format!("vm-{}", id))
                .with_cores(CoreAllocation::Pinned(cores))
                .with_memory(2048 * MIB)
                .with_hugepages(id % 2 == 0),
        );
        snapshot.vm_interfaces.push(VirtualMachineInterface {
            id: 10_000 + id,
            vm_id: id,
            mac_address: None,
            host_interface_id: Some(1000 + (id % NODES as u64)),
            attachment_type: if id % 3 == 0 {
                InterfaceAttachType::Sriov
            } else {
                InterfaceAttachType::Bridge
            },
        });
    }
    snapshot
}

fn bench_host_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("numa_accounting");

    for vm_count in [16u64, 128, 1024] {
        let snapshot = host(vm_count);
        group.throughput(Throughput::Elements(vm_count));
        group.bench_with_input(
            BenchmarkId::new("get_vm_host_resources", vm_count),
            &snapshot,
            |b, snapshot| b.iter(|| get_vm_host_resources(black_box(snapshot))),
        );
    }

    group.finish();
}

fn bench_summary(c: &mut Criterion) {
    let nodes = get_vm_host_resources(&host(1024));

    c.bench_function("summarize_1024_vms", |b| {
        b.iter(|| summarize(black_box(&nodes)))
    });
}

criterion_group!(benches, bench_host_report, bench_summary);
criterion_main!(benches);
