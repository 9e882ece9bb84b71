//! Pod inventory loading
//!
//! Populates the resource graph from an inventory description (YAML or
//! JSON), standing in for the discovery agents that normally keep the pool
//! up to date.

use super::entity::{Asset, Entity, EntityId, EntityKind};
use super::link::LinkLabel;
use super::store::GraphStore;
use crate::domain::types::{Health, Location, State};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One discovered entity and its relations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntity {
    pub id: u64,
    pub name: String,
    /// Containing entity
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub managed_by: Option<u64>,
    #[serde(default)]
    pub uses: Vec<u64>,
    #[serde(default)]
    pub mastered_by: Option<u64>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub state: State,
    #[serde(flatten)]
    pub asset: Asset,
}

impl InventoryEntity {
    pub fn new(id: u64, name: impl Into<String>, asset: Asset) -> Self {
        Self {
            id,
            name: name.into(),
            parent: None,
            managed_by: None,
            uses: Vec::new(),
            mastered_by: None,
            location: None,
            health: Health::Ok,
            state: State::Enabled,
            asset,
        }
    }

    pub fn within(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn managed_by(mut self, manager: u64) -> Self {
        self.managed_by = Some(manager);
        self
    }

    pub fn uses(mut self, used: u64) -> Self {
        self.uses.push(used);
        self
    }

    pub fn mastered_by(mut self, master: u64) -> Self {
        self.mastered_by = Some(master);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(EntityId(self.id), self.name.clone(), self.asset.clone());
        entity.location = self.location.clone();
        entity.health = self.health;
        entity.state = self.state;
        entity
    }
}

/// A pod inventory description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodInventory {
    pub entities: Vec<InventoryEntity>,
}

impl PodInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: InventoryEntity) -> &mut Self {
        self.entities.push(entity);
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a file, picking the format by extension (YAML by default)
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Insert every entity and relation into the store in one unit of work
    pub fn load_into(&self, store: &GraphStore) -> Result<usize> {
        let mut uow = store.begin();

        for item in &self.entities {
            if item.asset.kind() == EntityKind::ComposedNode {
                return Err(Error::Configuration(format!(
                    "inventory entity {} is a composed node; nodes are only created by allocation",
                    item.id
                )));
            }
            uow.insert(item.to_entity())?;
        }

        for item in &self.entities {
            let id = EntityId(item.id);
            if let Some(parent) = item.parent {
                uow.link(EntityId(parent), LinkLabel::Contains, id)?;
            }
            if let Some(manager) = item.managed_by {
                uow.link(id, LinkLabel::ManagedBy, EntityId(manager))?;
            }
            for used in &item.uses {
                uow.link(id, LinkLabel::Uses, EntityId(*used))?;
            }
            if let Some(master) = item.mastered_by {
                uow.link(id, LinkLabel::MasteredBy, EntityId(master))?;
            }
        }

        let count = self.entities.len();
        uow.commit();
        info!(entities = count, "Loaded pod inventory");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const INVENTORY: &str = r#"
entities:
  - id: 1
    name: pod-1
    kind: Pod
    location: { Pod: 1 }
  - id: 5
    name: bmc-5
    kind: Manager
  - id: 7
    name: blade-7
    kind: Blade
    parent: 1
    managedBy: 5
  - id: 10
    name: cpu-10
    kind: Processor
    parent: 7
    model: E5
    instructionSet: x86-64
    instructionSetExtensions: [AVX, AVX2]
    totalCores: 16
    maxSpeedMhz: 3000
"#;

    #[test]
    fn test_load_yaml_inventory() {
        let inventory = PodInventory::from_yaml_str(INVENTORY).unwrap();
        let store = GraphStore::new();
        assert_eq!(inventory.load_into(&store).unwrap(), 4);

        let view = store.read();
        let cpu = view.find_kind(EntityId(10), EntityKind::Processor).unwrap();
        assert_eq!(cpu.as_processor().unwrap().total_cores, 16);
        assert_eq!(view.owning_manager(EntityId(10)).unwrap(), Some(EntityId(5)));
        assert_eq!(
            view.effective_location(EntityId(10)).map(|l| l.to_string()),
            Some("Pod=1".to_string())
        );
    }

    #[test]
    fn test_dangling_reference_rolls_back_load() {
        let mut inventory = PodInventory::new();
        inventory
            .push(InventoryEntity::new(1, "pod", Asset::Pod))
            .push(InventoryEntity::new(7, "blade", Asset::Blade).within(99));

        let store = GraphStore::new();
        assert_matches!(inventory.load_into(&store), Err(Error::EntityNotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"entities":[{{"id":3,"name":"svc","kind":"StorageService"}}]}}"#
        )
        .unwrap();

        let inventory = PodInventory::from_path(file.path()).unwrap();
        let store = GraphStore::new();
        inventory.load_into(&store).unwrap();
        assert_eq!(store.find(EntityId(3)).unwrap().kind(), EntityKind::StorageService);
    }
}
