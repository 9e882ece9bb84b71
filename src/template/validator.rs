//! Template validation
//!
//! Checks a template before allocation and reports every violation at once,
//! each with the path of the offending field.

use super::request::{ComposedNodeTemplate, RemoteDriveRequirement, VlanRequirement};
use crate::context;
use crate::error::{Error, Result};
use crate::graph::{EntityKind, Graph, GraphStore, VolumeMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Lowest and highest assignable 802.1Q VLAN id
const VLAN_ID_RANGE: std::ops::RangeInclusive<i32> = 1..=4094;

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Every violation found in a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Whether any violation concerns `field`
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    fn positive<T>(&mut self, field: String, value: Option<T>)
    where
        T: PartialOrd + Default + std::fmt::Display,
    {
        if let Some(value) = value {
            if value <= T::default() {
                self.push(field, format!("must be greater than 0, got {}", value));
            }
        }
    }

    fn non_negative(&mut self, field: String, value: Option<i32>) {
        if let Some(value) = value {
            if value < 0 {
                self.push(field, format!("must not be negative, got {}", value));
            }
        }
    }

    fn recognized(&mut self, field: String, recognized: bool, value: &dyn std::fmt::Display) {
        if !recognized {
            self.push(field, format!("unrecognized value '{}'", value));
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", violation.field, violation.message)?;
        }
        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate `template` against the rules and the current pool
pub fn validate(graph: &Graph, template: &ComposedNodeTemplate) -> std::result::Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if template.name.trim().is_empty() {
        errors.push("name", "must not be empty");
    }

    for (i, cpu) in template.processors.iter().enumerate() {
        let field = |name: &str| format!("processors[{}].{}", i, name);
        errors.non_negative(field("quantity"), cpu.quantity);
        errors.positive(field("totalCores"), cpu.total_cores);
        errors.positive(field("maxSpeedMhz"), cpu.max_speed_mhz);
        if let Some(model) = &cpu.model {
            errors.recognized(field("model"), model.is_recognized(), model);
        }
        if let Some(set) = &cpu.instruction_set {
            errors.recognized(field("instructionSet"), set.is_recognized(), set);
        }
        for (j, ext) in cpu.instruction_set_extensions.iter().enumerate() {
            errors.recognized(
                format!("processors[{}].instructionSetExtensions[{}]", i, j),
                ext.is_recognized(),
                ext,
            );
        }
    }

    for (i, memory) in template.memory.iter().enumerate() {
        let field = |name: &str| format!("memory[{}].{}", i, name);
        errors.non_negative(field("quantity"), memory.quantity);
        errors.positive(field("sizeGb"), memory.size_gb);
        errors.positive(field("speedMhz"), memory.speed_mhz);
        if let Some(kind) = &memory.memory_type {
            errors.recognized(field("type"), kind.is_recognized(), kind);
        }
    }

    let mut local_boot = HashSet::new();
    for (i, drive) in template.local_drives.iter().enumerate() {
        let field = |name: &str| format!("localDrives[{}].{}", i, name);
        errors.non_negative(field("quantity"), drive.quantity);
        errors.positive(field("capacityGb"), drive.capacity_gb);
        errors.non_negative(field("bootOrder"), drive.boot_order);
        if let Some(kind) = &drive.drive_type {
            errors.recognized(field("type"), kind.is_recognized(), kind);
        }
        if let Some(order) = drive.boot_order {
            if !local_boot.insert(order) {
                errors.push(field("bootOrder"), format!("boot order {} is used twice", order));
            }
        }
    }

    let mut remote_boot = HashSet::new();
    for (i, drive) in template.remote_drives.iter().enumerate() {
        validate_remote_drive(graph, i, drive, &mut errors);
        if let Some(order) = drive.boot_order {
            if !remote_boot.insert(order) {
                errors.push(
                    format!("remoteDrives[{}].bootOrder", i),
                    format!("boot order {} is used twice", order),
                );
            }
        }
    }

    for (i, nic) in template.network_interfaces.iter().enumerate() {
        let field = |name: &str| format!("networkInterfaces[{}].{}", i, name);
        errors.non_negative(field("quantity"), nic.quantity);
        errors.positive(field("speedMbps"), nic.speed_mbps);
        validate_vlans(i, &nic.vlans, &mut errors);
    }

    let wants_compute = template.processors.iter().any(|cpu| cpu.count() > 0)
        || template.memory.iter().any(|memory| !memory.is_empty());
    if !wants_compute {
        errors.push(
            "processors",
            "at least one processor or memory requirement must be requested",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_remote_drive(
    graph: &Graph,
    index: usize,
    drive: &RemoteDriveRequirement,
    errors: &mut ValidationErrors,
) {
    let field = |name: &str| format!("remoteDrives[{}].{}", index, name);
    errors.positive(field("capacityGb"), drive.capacity_gb);
    errors.non_negative(field("bootOrder"), drive.boot_order);
    if let Some(backend) = &drive.storage_backend {
        errors.recognized(field("storageBackend"), backend.is_recognized(), backend);
    }
    if let Some(kind) = &drive.address_type {
        errors.recognized(field("addressType"), kind.is_recognized(), kind);
    }
    if matches!(&drive.address, Some(address) if address.trim().is_empty()) {
        errors.push(field("address"), "must not be empty");
    }

    if drive.master.is_none() && drive.address.is_none() && drive.capacity_gb.is_none() {
        errors.push(
            field("capacityGb"),
            "a remote drive needs a master, a target address or a capacity",
        );
    }

    let Some(master) = &drive.master else {
        return;
    };
    errors.recognized(
        field("master.type"),
        master.replication.is_recognized(),
        &master.replication,
    );
    match context::resolve(graph, &master.address) {
        Ok(entity) => match entity.as_remote_drive() {
            Some(info) if info.mode != VolumeMode::Volume => errors.push(
                field("master.address"),
                format!("{} is a volume group, not a volume", master.address),
            ),
            Some(info) => {
                if let Some(capacity) = drive.capacity_gb {
                    if capacity > 0 && (capacity as u64) < info.capacity_gb {
                        errors.push(
                            field("capacityGb"),
                            format!(
                                "{} GB is smaller than the master's {} GB",
                                capacity, info.capacity_gb
                            ),
                        );
                    }
                }
            }
            None => errors.push(
                field("master.address"),
                format!("{} is a {}, not a remote drive", master.address, entity.kind()),
            ),
        },
        Err(_) => errors.push(
            field("master.address"),
            format!("{} does not resolve to a {}", master.address, EntityKind::RemoteDrive),
        ),
    }
}

fn validate_vlans(index: usize, vlans: &[VlanRequirement], errors: &mut ValidationErrors) {
    let mut seen = HashSet::new();
    let mut untagged = 0;
    for (j, vlan) in vlans.iter().enumerate() {
        let field = format!("networkInterfaces[{}].vlans[{}].vlanId", index, j);
        if !VLAN_ID_RANGE.contains(&vlan.vlan_id) {
            errors.push(
                field.clone(),
                format!("{} is outside {}..={}", vlan.vlan_id, VLAN_ID_RANGE.start(), VLAN_ID_RANGE.end()),
            );
        }
        if !seen.insert(vlan.vlan_id) {
            errors.push(field, format!("VLAN {} is requested twice", vlan.vlan_id));
        }
        if !vlan.tagged {
            untagged += 1;
        }
    }
    if untagged > 1 {
        errors.push(
            format!("networkInterfaces[{}].vlans", index),
            format!("at most one untagged VLAN allowed, got {}", untagged),
        );
    }
}

/// Validator bound to the shared pool
pub struct TemplateValidator {
    graph: Arc<GraphStore>,
}

impl TemplateValidator {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    pub fn validate(&self, template: &ComposedNodeTemplate) -> Result<()> {
        validate(&self.graph.read(), template).map_err(|errors| {
            debug!(
                template = %template.name,
                violations = errors.len(),
                "Template rejected"
            );
            Error::Validation(errors)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ReplicationMethod;
    use crate::fixtures;
    use crate::template::request::*;
    use assert_matches::assert_matches;

    fn compute() -> ComposedNodeTemplate {
        let mut template = ComposedNodeTemplate::named("node-1");
        template.processors.push(ProcessorRequirement::default());
        template
    }

    fn check(template: &ComposedNodeTemplate) -> std::result::Result<(), ValidationErrors> {
        let store = fixtures::pod();
        let view = store.read();
        validate(&view, template)
    }

    #[test]
    fn test_minimal_template_is_valid() {
        assert!(check(&compute()).is_ok());
    }

    #[test]
    fn test_collects_every_violation() {
        let mut template = compute();
        template.name = " ".into();
        template.processors[0].quantity = Some(-1);
        template.processors[0].model = Some("Z80".into());
        template.memory.push(MemoryRequirement {
            size_gb: Some(0),
            ..Default::default()
        });

        let errors = check(&template).unwrap_err();
        assert!(errors.mentions("name"));
        assert!(errors.mentions("processors[0].quantity"));
        assert!(errors.mentions("processors[0].model"));
        assert!(errors.mentions("memory[0].sizeGb"));
    }

    #[test]
    fn test_requires_compute() {
        let mut template = ComposedNodeTemplate::named("storage-only");
        template.local_drives.push(LocalDriveRequirement::default());
        assert!(check(&template).unwrap_err().mentions("processors"));

        template.memory.push(MemoryRequirement {
            quantity: Some(0),
            ..Default::default()
        });
        assert!(check(&template).unwrap_err().mentions("processors"));

        template.memory[0].quantity = Some(1);
        assert!(check(&template).is_ok());
    }

    #[test]
    fn test_vlan_rules() {
        let mut template = compute();
        template.network_interfaces.push(NetworkInterfaceRequirement {
            vlans: vec![
                VlanRequirement { vlan_id: 0, tagged: true },
                VlanRequirement { vlan_id: 10, tagged: false },
                VlanRequirement { vlan_id: 10, tagged: true },
                VlanRequirement { vlan_id: 20, tagged: false },
                VlanRequirement { vlan_id: 4095, tagged: true },
            ],
            ..Default::default()
        });

        let errors = check(&template).unwrap_err();
        assert!(errors.mentions("networkInterfaces[0].vlans[0].vlanId"));
        assert!(errors.mentions("networkInterfaces[0].vlans[2].vlanId"));
        assert!(errors.mentions("networkInterfaces[0].vlans"));
        assert!(errors.mentions("networkInterfaces[0].vlans[4].vlanId"));
        assert!(!errors.mentions("networkInterfaces[0].vlans[1].vlanId"));
    }

    #[test]
    fn test_boot_order_unique_per_drive_category() {
        let mut template = compute();
        template.local_drives.push(LocalDriveRequirement {
            boot_order: Some(1),
            ..Default::default()
        });
        template.local_drives.push(LocalDriveRequirement {
            boot_order: Some(1),
            ..Default::default()
        });
        template.remote_drives.push(RemoteDriveRequirement {
            capacity_gb: Some(100),
            boot_order: Some(1),
            ..Default::default()
        });

        let errors = check(&template).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.mentions("localDrives[1].bootOrder"));
    }

    #[test]
    fn test_remote_drive_rules() {
        let mut template = compute();
        template.remote_drives.push(RemoteDriveRequirement::default());
        template.remote_drives.push(RemoteDriveRequirement {
            capacity_gb: Some(50),
            master: Some(MasterDrive {
                replication: ReplicationMethod::Clone,
                address: "/Services/61/LogicalDrives/63".parse().unwrap(),
            }),
            ..Default::default()
        });
        template.remote_drives.push(RemoteDriveRequirement {
            master: Some(MasterDrive {
                replication: ReplicationMethod::Snapshot,
                address: "/Pods/1/Racks/2/Drawers/3/Modules/4/Blades/7".parse().unwrap(),
            }),
            ..Default::default()
        });

        let errors = check(&template).unwrap_err();
        assert!(errors.mentions("remoteDrives[0].capacityGb"));
        // Master 63 holds 100 GB
        assert!(errors.mentions("remoteDrives[1].capacityGb"));
        assert!(errors.mentions("remoteDrives[2].master.address"));
    }

    #[test]
    fn test_volume_group_is_not_a_master() {
        let mut template = compute();
        template.remote_drives.push(RemoteDriveRequirement {
            master: Some(MasterDrive {
                replication: ReplicationMethod::Clone,
                address: "/Services/61/LogicalDrives/62".parse().unwrap(),
            }),
            ..Default::default()
        });

        let errors = check(&template).unwrap_err();
        assert!(errors.mentions("remoteDrives[0].master.address"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_clone_of_master_is_valid() {
        let mut template = compute();
        template.remote_drives.push(RemoteDriveRequirement {
            master: Some(MasterDrive {
                replication: ReplicationMethod::Clone,
                address: "/Services/61/LogicalDrives/63".parse().unwrap(),
            }),
            boot_order: Some(1),
            ..Default::default()
        });
        assert!(check(&template).is_ok());
    }

    #[test]
    fn test_validator_wraps_errors() {
        let validator = TemplateValidator::new(fixtures::pod());
        let template = ComposedNodeTemplate::named("");
        assert_matches!(validator.validate(&template), Err(Error::Validation(errors)) if errors.len() == 2);
    }
}
