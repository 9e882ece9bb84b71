//! Benchmarks for allocation and the full compose cycle
//!
//! Target: 1K allocate/release cycles/sec on a 64-blade pod

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pod_composer::allocation::candidates;
use pod_composer::domain::types::{InstructionSet, Location, MemoryType, ProcessorModel};
use pod_composer::graph::{
    Asset, InventoryEntity, ManagerInfo, MemoryInfo, NetworkInterfaceInfo, ProcessorInfo,
};
use pod_composer::metrics::EngineMetrics;
use pod_composer::template::{MemoryRequirement, ProcessorRequirement};
use pod_composer::{
    ComposedNodeTemplate, Composer, EngineConfig, GraphStore, InMemoryDevices,
    ManagerDirectoryRef, NodeAllocator, PodInventory, StaticDirectory,
};
use std::sync::Arc;

const BLADES: u64 = 64;

/// One drawer of `BLADES` blades, each with 4 processors, 8 DIMMs and 2 NICs
fn pod() -> Arc<GraphStore> {
    let mut inventory = PodInventory::new();
    inventory
        .push(InventoryEntity::new(1, "pod-1", Asset::Pod).at(Location::new().with("Pod", 1)))
        .push(InventoryEntity::new(2, "drawer-2", Asset::Drawer).within(1).managed_by(3))
        .push(InventoryEntity::new(3, "bmc-3", Asset::Manager(ManagerInfo::default())));

    let mut next = 100;
    let mut id = || {
        next += 1;
        next
    };
    for blade in 0..BLADES {
        let blade_id = id();
        inventory.push(
            InventoryEntity::new(blade_id, format!("blade-{}", blade), Asset::Blade)
                .within(2)
                .at(Location::new().with("Pod", 1).with("Blade", blade as u32)),
        );
        for _ in 0..4 {
            let cpu = id();
            inventory.push(
                InventoryEntity::new(
                    cpu,
                    format!("cpu-{}", cpu),
                    Asset::Processor(ProcessorInfo {
                        model: if blade % 2 == 0 { ProcessorModel::E5 } else { ProcessorModel::E7 },
                        instruction_set: InstructionSet::X86_64,
                        instruction_set_extensions: Vec::new(),
                        total_cores: 16,
                        max_speed_mhz: 3000,
                    }),
                )
                .within(blade_id),
            );
        }
        for _ in 0..8 {
            let dimm = id();
            inventory.push(
                InventoryEntity::new(
                    dimm,
                    format!("dimm-{}", dimm),
                    Asset::Memory(MemoryInfo {
                        memory_type: MemoryType::Ddr4,
                        size_gb: 16,
                        speed_mhz: 2400,
                    }),
                )
                .within(blade_id),
            );
        }
        for _ in 0..2 {
            let nic = id();
            inventory.push(
                InventoryEntity::new(
                    nic,
                    format!("eth-{}", nic),
                    Asset::NetworkInterface(NetworkInterfaceInfo {
                        mac_address: None,
                        speed_mbps: 10_000,
                        vlan_enabled: true,
                    }),
                )
                .within(blade_id),
            );
        }
    }

    let store = GraphStore::new();
    if let Err(e) = inventory.load_into(&store) {
        panic!("bench inventory rejected: {}", e);
    }
    store
}

fn template() -> ComposedNodeTemplate {
    let mut template = ComposedNodeTemplate::named("bench");
    template.processors.push(ProcessorRequirement {
        quantity: Some(2),
        model: Some(ProcessorModel::E7),
        ..Default::default()
    });
    template.memory.push(MemoryRequirement {
        size_gb: Some(64),
        ..Default::default()
    });
    template
}

fn directory() -> ManagerDirectoryRef {
    Arc::new(StaticDirectory::with_fallback(InMemoryDevices::new("bench")))
}

fn bench_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1));

    let store = pod();
    let requirement = ProcessorRequirement {
        model: Some(ProcessorModel::E7),
        ..Default::default()
    };

    group.bench_function("match_processors", |b| {
        b.iter(|| {
            let view = store.read();
            black_box(candidates(&view, black_box(&requirement)).len())
        });
    });

    group.finish();
}

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = pod();
    let composer = Composer::new(EngineConfig::default(), store, directory()).unwrap();
    let template = template();

    group.bench_function("allocate_release", |b| {
        b.iter(|| {
            let node = composer.create_node(black_box(&template)).unwrap();
            runtime.block_on(composer.disassemble(node)).unwrap();
        });
    });

    group.bench_function("compose_teardown", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let node = composer.compose(black_box(&template)).await.unwrap();
                composer.disassemble(node).await.unwrap();
            });
        });
    });

    group.finish();
}

fn bench_concurrent_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(BLADES / 2));

    let runtime = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_fill_pool", |b| {
        b.iter(|| {
            let store = pod();
            let allocator = NodeAllocator::new(
                store.clone(),
                EngineConfig::default().iqn_prefix,
                EngineMetrics::new(),
            );
            runtime.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..BLADES / 2 {
                    let allocator = allocator.clone();
                    handles.push(tokio::spawn(async move {
                        let _ = allocator.allocate(&template());
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
            black_box(store.len())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_candidates,
    bench_allocate_release,
    bench_concurrent_allocation,
);
criterion_main!(benches);
