//! Shared test pod
//!
//! ```text
//! Pod 1 ─ Rack 2 ─ Drawer 3 ─ Module 4 (managed by 5)
//!                               ├─ Blade 7: cpu 10 11 12 (E5), dimm 30 31 (16 GB),
//!                               │           ssd 40 (250 GB), nic 50 51 (10G, VLAN)
//!                               └─ Blade 9: cpu 20 (E5) 21 (E3), dimm 32 (32 GB),
//!                                           nic 52 (1G)
//! Storage service 61 (managed by 60)
//!   volume group 62 (2048 GB) used by 63 (master, 100 GB), 64 (500 GB), 66 (200 GB)
//!   target 65 exposes 64
//! ```

use crate::config::RetryConfig;
use crate::devices::{InMemoryDevices, StaticDirectory};
use crate::domain::ports::ManagerDirectoryRef;
use crate::domain::types::{
    DriveType, InstructionSet, InstructionSetExtension, Location, MemoryType, ProcessorModel,
};
use crate::graph::{
    Asset, EntityId, EntityKind, GraphStore, InventoryEntity, LocalDriveInfo, ManagerInfo,
    MemoryInfo, NetworkInterfaceInfo, PodInventory, ProcessorInfo, RemoteDriveInfo,
    RemoteTargetInfo, VolumeMode,
};
use crate::template::{ComposedNodeTemplate, ProcessorRequirement};
use std::sync::Arc;

pub const COMPUTE_MANAGER: EntityId = EntityId(5);
pub const BLADE_7: EntityId = EntityId(7);
pub const LOCAL_DRIVE: EntityId = EntityId(40);
pub const STORAGE_MANAGER: EntityId = EntityId(60);
pub const VOLUME_GROUP: EntityId = EntityId(62);
pub const MASTER_DRIVE: EntityId = EntityId(63);
pub const EXPOSED_VOLUME: EntityId = EntityId(64);
pub const EXPOSED_TARGET: EntityId = EntityId(65);
pub const BARE_VOLUME: EntityId = EntityId(66);
pub const TARGET_IQN: &str = "iqn.2016-01.io.pod-composer:volume-64";

pub fn blade_location(blade: u32) -> Location {
    Location::new()
        .with("Pod", 1)
        .with("Rack", 2)
        .with("Drawer", 3)
        .with("Module", 4)
        .with("Blade", blade)
}

fn processor(model: ProcessorModel, cores: u32) -> Asset {
    Asset::Processor(ProcessorInfo {
        model,
        instruction_set: InstructionSet::X86_64,
        instruction_set_extensions: vec![
            InstructionSetExtension::Sse42,
            InstructionSetExtension::Avx,
            InstructionSetExtension::Avx2,
        ],
        total_cores: cores,
        max_speed_mhz: 3000,
    })
}

fn memory(size_gb: u64, speed_mhz: u32) -> Asset {
    Asset::Memory(MemoryInfo {
        memory_type: MemoryType::Ddr4,
        size_gb,
        speed_mhz,
    })
}

fn nic(speed_mbps: u32, vlan_enabled: bool) -> Asset {
    Asset::NetworkInterface(NetworkInterfaceInfo {
        mac_address: None,
        speed_mbps,
        vlan_enabled,
    })
}

fn volume(mode: VolumeMode, capacity_gb: u64) -> Asset {
    Asset::RemoteDrive(RemoteDriveInfo {
        mode,
        capacity_gb,
        snapshot: false,
    })
}

pub fn inventory() -> PodInventory {
    let mut inventory = PodInventory::new();
    inventory
        .push(InventoryEntity::new(1, "pod-1", Asset::Pod).at(Location::new().with("Pod", 1)))
        .push(InventoryEntity::new(2, "rack-2", Asset::Rack).within(1))
        .push(InventoryEntity::new(3, "drawer-3", Asset::Drawer).within(2))
        .push(
            InventoryEntity::new(4, "module-4", Asset::ComputeModule)
                .within(3)
                .managed_by(5),
        )
        .push(InventoryEntity::new(5, "bmc-5", Asset::Manager(ManagerInfo::default())))
        .push(InventoryEntity::new(7, "blade-7", Asset::Blade).within(4).at(blade_location(7)))
        .push(InventoryEntity::new(9, "blade-9", Asset::Blade).within(4).at(blade_location(9)));

    for id in [10, 11, 12] {
        inventory.push(
            InventoryEntity::new(id, format!("cpu-{}", id), processor(ProcessorModel::E5, 16)).within(7),
        );
    }
    inventory
        .push(InventoryEntity::new(20, "cpu-20", processor(ProcessorModel::E5, 16)).within(9))
        .push(InventoryEntity::new(21, "cpu-21", processor(ProcessorModel::E3, 4)).within(9))
        .push(InventoryEntity::new(30, "dimm-30", memory(16, 2400)).within(7))
        .push(InventoryEntity::new(31, "dimm-31", memory(16, 2400)).within(7))
        .push(InventoryEntity::new(32, "dimm-32", memory(32, 2666)).within(9))
        .push(
            InventoryEntity::new(
                40,
                "ssd-40",
                Asset::LocalDrive(LocalDriveInfo {
                    drive_type: DriveType::Ssd,
                    capacity_gb: 250,
                }),
            )
            .within(7),
        )
        .push(InventoryEntity::new(50, "eth-50", nic(10_000, true)).within(7))
        .push(InventoryEntity::new(51, "eth-51", nic(10_000, true)).within(7))
        .push(InventoryEntity::new(52, "eth-52", nic(1_000, false)).within(9))
        .push(InventoryEntity::new(60, "storage-bmc-60", Asset::Manager(ManagerInfo::default())))
        .push(InventoryEntity::new(61, "storage-61", Asset::StorageService).managed_by(60))
        .push(InventoryEntity::new(62, "vg-62", volume(VolumeMode::VolumeGroup, 2048)).within(61))
        .push(
            InventoryEntity::new(63, "master-63", volume(VolumeMode::Volume, 100))
                .within(61)
                .uses(62),
        )
        .push(
            InventoryEntity::new(64, "volume-64", volume(VolumeMode::Volume, 500))
                .within(61)
                .uses(62),
        )
        .push(
            InventoryEntity::new(
                65,
                "target-65",
                Asset::RemoteTarget(RemoteTargetInfo {
                    target_iqn: TARGET_IQN.to_string(),
                    lun: 1,
                }),
            )
            .within(61)
            .uses(64),
        )
        .push(
            InventoryEntity::new(66, "volume-66", volume(VolumeMode::Volume, 200))
                .within(61)
                .uses(62),
        );
    inventory
}

/// A fresh store holding the test pod
pub fn pod() -> Arc<GraphStore> {
    let store = GraphStore::new();
    inventory().load_into(&store).unwrap();
    store
}

/// One in-memory endpoint answering for every manager
pub fn devices() -> (Arc<InMemoryDevices>, ManagerDirectoryRef) {
    let devices = InMemoryDevices::new("in-memory");
    let directory: ManagerDirectoryRef = Arc::new(StaticDirectory::with_fallback(devices.clone()));
    (devices, directory)
}

/// Retries without noticeable waiting
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_interval_ms: 1,
        max_interval_ms: 5,
        multiplier: 2.0,
        randomization_factor: 0.0,
        call_timeout_ms: 1_000,
    }
}

/// One E5 processor
pub fn compute_template(name: &str) -> ComposedNodeTemplate {
    let mut template = ComposedNodeTemplate::named(name);
    template.processors.push(ProcessorRequirement {
        model: Some(ProcessorModel::E5),
        ..Default::default()
    });
    template
}

/// Free count per claimable kind
pub fn free_counts(store: &GraphStore) -> Vec<(EntityKind, usize)> {
    EntityKind::CLAIMABLE
        .iter()
        .map(|kind| (*kind, store.free_assets(*kind)))
        .collect()
}
