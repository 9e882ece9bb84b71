//! Requirement matching
//!
//! Constraint predicates deciding whether a free asset satisfies one template
//! requirement, and candidate selection in deterministic id order.

use crate::domain::types::Location;
use crate::graph::{
    Entity, EntityId, EntityKind, Graph, LocalDriveInfo, MemoryInfo, NetworkInterfaceInfo,
    ProcessorInfo, RemoteDriveInfo, VolumeMode,
};
use crate::template::{
    LocalDriveRequirement, MemoryRequirement, NetworkInterfaceRequirement, ProcessorRequirement,
    RequirementCategory,
};

/// Whether `actual` meets an optional signed minimum
fn at_least<T: Into<i64>>(actual: T, minimum: Option<impl Into<i64>>) -> bool {
    minimum.map_or(true, |min| actual.into() >= min.into())
}

/// Whether `actual` equals an optional requested value
fn equals<T: PartialEq>(actual: &T, requested: Option<&T>) -> bool {
    requested.map_or(true, |wanted| wanted == actual)
}

// =============================================================================
// Requirement
// =============================================================================

/// A template requirement that selects assets of one kind
pub trait Requirement {
    const CATEGORY: RequirementCategory;
    const KIND: EntityKind;

    fn location(&self) -> Option<&Location>;

    /// Constraint check on the asset payload
    fn accepts(&self, entity: &Entity) -> bool;
}

impl ProcessorRequirement {
    pub fn matches(&self, cpu: &ProcessorInfo) -> bool {
        equals(&cpu.model, self.model.as_ref())
            && equals(&cpu.instruction_set, self.instruction_set.as_ref())
            && self
                .instruction_set_extensions
                .iter()
                .all(|ext| cpu.instruction_set_extensions.contains(ext))
            && at_least(cpu.total_cores, self.total_cores)
            && at_least(cpu.max_speed_mhz, self.max_speed_mhz)
    }
}

impl Requirement for ProcessorRequirement {
    const CATEGORY: RequirementCategory = RequirementCategory::Processor;
    const KIND: EntityKind = EntityKind::Processor;

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn accepts(&self, entity: &Entity) -> bool {
        entity.as_processor().map_or(false, |cpu| self.matches(cpu))
    }
}

impl MemoryRequirement {
    /// Per-module constraints; total size is checked across the selection
    pub fn matches(&self, memory: &MemoryInfo) -> bool {
        equals(&memory.memory_type, self.memory_type.as_ref())
            && at_least(memory.speed_mhz, self.speed_mhz)
    }
}

impl Requirement for MemoryRequirement {
    const CATEGORY: RequirementCategory = RequirementCategory::Memory;
    const KIND: EntityKind = EntityKind::Memory;

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn accepts(&self, entity: &Entity) -> bool {
        entity.as_memory().map_or(false, |memory| self.matches(memory))
    }
}

impl LocalDriveRequirement {
    pub fn matches(&self, drive: &LocalDriveInfo) -> bool {
        equals(&drive.drive_type, self.drive_type.as_ref())
            && self
                .capacity_gb
                .map_or(true, |min| drive.capacity_gb as i64 >= min)
    }
}

impl Requirement for LocalDriveRequirement {
    const CATEGORY: RequirementCategory = RequirementCategory::LocalDrive;
    const KIND: EntityKind = EntityKind::LocalDrive;

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn accepts(&self, entity: &Entity) -> bool {
        entity.as_local_drive().map_or(false, |drive| self.matches(drive))
    }
}

impl NetworkInterfaceRequirement {
    pub fn matches(&self, nic: &NetworkInterfaceInfo) -> bool {
        at_least(nic.speed_mbps, self.speed_mbps) && (self.vlans.is_empty() || nic.vlan_enabled)
    }
}

impl Requirement for NetworkInterfaceRequirement {
    const CATEGORY: RequirementCategory = RequirementCategory::NetworkInterface;
    const KIND: EntityKind = EntityKind::NetworkInterface;

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn accepts(&self, entity: &Entity) -> bool {
        entity.as_network_interface().map_or(false, |nic| self.matches(nic))
    }
}

/// A consumable volume of at least `capacity_gb`
pub fn volume_fits(drive: &RemoteDriveInfo, capacity_gb: u64) -> bool {
    drive.mode == VolumeMode::Volume && drive.capacity_gb >= capacity_gb
}

// =============================================================================
// Candidate selection
// =============================================================================

/// Whether the asset sits at the requested location (inherited through containment)
pub fn located_at(graph: &Graph, id: EntityId, requested: Option<&Location>) -> bool {
    match requested {
        None => true,
        Some(requested) if requested.is_empty() => true,
        Some(requested) => graph
            .effective_location(id)
            .map_or(false, |location| location.satisfies(requested)),
    }
}

/// Available assets satisfying `requirement`, ascending by id
pub fn candidates<R: Requirement>(graph: &Graph, requirement: &R) -> Vec<EntityId> {
    graph
        .entities_of(R::KIND)
        .filter(|entity| graph.is_available(entity))
        .filter(|entity| requirement.accepts(entity))
        .filter(|entity| located_at(graph, entity.id, requirement.location()))
        .map(|entity| entity.id)
        .collect()
}
