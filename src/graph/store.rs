//! Resource Graph Store
//!
//! An in-memory entity table with a bidirectional adjacency index, guarded by
//! a single `parking_lot::RwLock`. Reads take a shared [`GraphView`]; every
//! mutation goes through a [`UnitOfWork`] holding the write guard and an undo
//! journal. Committing publishes the buffered [`GraphEvent`]s; dropping an
//! uncommitted unit of work replays the journal in reverse.

use super::entity::{Asset, Entity, EntityId, EntityKind};
use super::events::GraphEvent;
use super::link::LinkLabel;
use crate::domain::types::Location;
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Upper bound on containment depth when walking towards a root
const MAX_CONTAINMENT_DEPTH: usize = 16;

type LinkKey = (EntityId, LinkLabel);
type LinkTriple = (EntityId, LinkLabel, EntityId);

// =============================================================================
// Graph
// =============================================================================

/// Entity table plus adjacency index
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    entities: BTreeMap<EntityId, Entity>,
    /// Canonical links keyed by source
    outgoing: HashMap<LinkKey, BTreeSet<EntityId>>,
    /// Canonical links keyed by target
    incoming: HashMap<LinkKey, BTreeSet<EntityId>>,
    next_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Graph {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Find an entity by id
    pub fn find(&self, id: EntityId) -> Result<&Entity> {
        self.entities
            .get(&id)
            .ok_or_else(|| Error::not_found("Entity", id))
    }

    /// Find an entity by id, requiring a kind
    pub fn find_kind(&self, id: EntityId, kind: EntityKind) -> Result<&Entity> {
        match self.entities.get(&id) {
            Some(entity) if entity.kind() == kind => Ok(entity),
            _ => Err(Error::not_found(kind, id)),
        }
    }

    /// All entities in ascending id order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    /// Entities of one kind in ascending id order
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values().filter(move |e| e.kind() == kind)
    }

    // =========================================================================
    // Link queries
    // =========================================================================

    /// Ids linked from `id` by `label`, ascending
    pub fn neighbours(&self, id: EntityId, label: LinkLabel) -> impl Iterator<Item = EntityId> + '_ {
        let set = if label.is_canonical() {
            self.outgoing.get(&(id, label))
        } else {
            self.incoming.get(&(id, label.inverse()))
        };
        set.into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn has_link(&self, from: EntityId, label: LinkLabel, to: EntityId) -> bool {
        let (from, label, to) = label.canonicalize(from, to);
        self.outgoing
            .get(&(from, label))
            .map_or(false, |targets| targets.contains(&to))
    }

    /// Entities of `kind` linked from `id` by `label`
    pub fn linked(&self, id: EntityId, label: LinkLabel, kind: EntityKind) -> Vec<&Entity> {
        self.neighbours(id, label)
            .filter_map(|n| self.entities.get(&n))
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// Exactly one entity of `kind` linked from `id` by `label`
    pub fn single(&self, id: EntityId, label: LinkLabel, kind: EntityKind) -> Result<&Entity> {
        self.single_of(id, label, Some(kind))?.ok_or_else(|| {
            Error::Consistency(format!("entity {} has no {} {}", id, label, kind))
        })
    }

    /// At most one entity of `kind` linked from `id` by `label`
    pub fn single_or_none(
        &self,
        id: EntityId,
        label: LinkLabel,
        kind: EntityKind,
    ) -> Result<Option<&Entity>> {
        self.single_of(id, label, Some(kind))
    }

    /// The entity containing `id`, of whatever kind
    pub fn container(&self, id: EntityId) -> Result<Option<&Entity>> {
        self.single_of(id, LinkLabel::ContainedBy, None)
    }

    fn single_of(
        &self,
        id: EntityId,
        label: LinkLabel,
        kind: Option<EntityKind>,
    ) -> Result<Option<&Entity>> {
        let mut found = self
            .neighbours(id, label)
            .filter_map(|n| self.entities.get(&n))
            .filter(|e| kind.map_or(true, |k| e.kind() == k));
        let first = found.next();
        if let Some(second) = found.next() {
            return Err(Error::Consistency(format!(
                "entity {} has more than one {} link ({} and {})",
                id,
                label,
                first.map(|e| e.id).unwrap_or(second.id),
                second.id
            )));
        }
        Ok(first)
    }

    // =========================================================================
    // Claims and topology
    // =========================================================================

    /// The composed node that claimed `id`, if any
    pub fn claimant(&self, id: EntityId) -> Option<EntityId> {
        self.neighbours(id, LinkLabel::IncludedIn).next()
    }

    pub fn is_claimed(&self, id: EntityId) -> bool {
        self.claimant(id).is_some()
    }

    /// Unclaimed, healthy and enabled
    pub fn is_available(&self, entity: &Entity) -> bool {
        entity.is_operational() && !self.is_claimed(entity.id)
    }

    /// Number of assets of `kind` a new allocation could still claim
    pub fn free_assets(&self, kind: EntityKind) -> usize {
        self.entities_of(kind).filter(|e| self.is_available(e)).count()
    }

    /// Own location, or the nearest one found walking containment upward
    pub fn effective_location(&self, id: EntityId) -> Option<&Location> {
        let mut current = self.entities.get(&id)?;
        for _ in 0..MAX_CONTAINMENT_DEPTH {
            if let Some(location) = &current.location {
                return Some(location);
            }
            let parent = self.neighbours(current.id, LinkLabel::ContainedBy).next()?;
            current = self.entities.get(&parent)?;
        }
        None
    }

    /// The manager responsible for `id`: the first `ManagedBy` link found
    /// walking containment upward
    pub fn owning_manager(&self, id: EntityId) -> Result<Option<EntityId>> {
        let mut current = id;
        for _ in 0..MAX_CONTAINMENT_DEPTH {
            if let Some(manager) = self.single_or_none(current, LinkLabel::ManagedBy, EntityKind::Manager)? {
                return Ok(Some(manager.id));
            }
            match self.container(current)? {
                Some(parent) => current = parent.id,
                None => return Ok(None),
            }
        }
        Err(Error::Consistency(format!(
            "containment of entity {} is deeper than {}",
            id, MAX_CONTAINMENT_DEPTH
        )))
    }

    // =========================================================================
    // Raw mutation (journaled by UnitOfWork)
    // =========================================================================

    fn link_raw(&mut self, from: EntityId, label: LinkLabel, to: EntityId) -> bool {
        let inserted = self.outgoing.entry((from, label)).or_default().insert(to);
        self.incoming.entry((to, label)).or_default().insert(from);
        inserted
    }

    fn unlink_raw(&mut self, from: EntityId, label: LinkLabel, to: EntityId) -> bool {
        let removed = remove_from(&mut self.outgoing, (from, label), to);
        remove_from(&mut self.incoming, (to, label), from);
        removed
    }

    /// Every stored link touching `id`
    fn links_of(&self, id: EntityId) -> Vec<LinkTriple> {
        let mut links = Vec::new();
        for ((from, label), targets) in &self.outgoing {
            for to in targets {
                if *from == id || *to == id {
                    links.push((*from, *label, *to));
                }
            }
        }
        links.sort();
        links
    }
}

fn remove_from(index: &mut HashMap<LinkKey, BTreeSet<EntityId>>, key: LinkKey, id: EntityId) -> bool {
    let Some(set) = index.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&id);
    if set.is_empty() {
        index.remove(&key);
    }
    removed
}

// =============================================================================
// Unit of Work
// =============================================================================

/// Journal entry recording how to undo one mutation
#[derive(Debug)]
enum Undo {
    Inserted(EntityId),
    Replaced(Entity),
    Removed(Entity),
    Linked(LinkTriple),
    Unlinked(LinkTriple),
    NextId(u64),
}

/// Exclusive, all-or-nothing batch of graph mutations
pub struct UnitOfWork<'a> {
    graph: RwLockWriteGuard<'a, Graph>,
    journal: Vec<Undo>,
    events: Vec<GraphEvent>,
    event_sender: &'a broadcast::Sender<GraphEvent>,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    /// Create an entity with a fresh id
    pub fn add_entity(&mut self, name: impl Into<String>, asset: Asset) -> EntityId {
        let id = EntityId(self.graph.next_id);
        self.journal.push(Undo::NextId(self.graph.next_id));
        self.graph.next_id += 1;
        let entity = Entity::new(id, name, asset);
        self.events.push(GraphEvent::EntityAdded {
            id,
            kind: entity.kind(),
        });
        self.graph.entities.insert(id, entity);
        self.journal.push(Undo::Inserted(id));
        id
    }

    /// Insert an entity with a caller-chosen id
    pub fn insert(&mut self, entity: Entity) -> Result<EntityId> {
        let id = entity.id;
        if self.graph.contains(id) {
            return Err(Error::Consistency(format!("entity {} already exists", id)));
        }
        if id.0 >= self.graph.next_id {
            self.journal.push(Undo::NextId(self.graph.next_id));
            self.graph.next_id = id.0 + 1;
        }
        self.events.push(GraphEvent::EntityAdded {
            id,
            kind: entity.kind(),
        });
        self.graph.entities.insert(id, entity);
        self.journal.push(Undo::Inserted(id));
        Ok(id)
    }

    /// Modify an entity in place
    pub fn update<F>(&mut self, id: EntityId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Entity),
    {
        let entity = self
            .graph
            .entities
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Entity", id))?;
        self.journal.push(Undo::Replaced(entity.clone()));
        f(entity);
        entity.modified = Utc::now();
        Ok(())
    }

    /// Add a link, returning false if it already existed
    pub fn link(&mut self, from: EntityId, label: LinkLabel, to: EntityId) -> Result<bool> {
        self.graph.find(from)?;
        self.graph.find(to)?;
        let triple = label.canonicalize(from, to);
        let inserted = self.graph.link_raw(triple.0, triple.1, triple.2);
        if inserted {
            self.journal.push(Undo::Linked(triple));
        }
        Ok(inserted)
    }

    /// Remove a link, returning false if it did not exist
    pub fn unlink(&mut self, from: EntityId, label: LinkLabel, to: EntityId) -> bool {
        let triple = label.canonicalize(from, to);
        let removed = self.graph.unlink_raw(triple.0, triple.1, triple.2);
        if removed {
            self.journal.push(Undo::Unlinked(triple));
        }
        removed
    }

    /// Remove an entity together with every link touching it
    pub fn delete(&mut self, id: EntityId) -> Result<Entity> {
        self.graph.find(id)?;
        for (from, label, to) in self.graph.links_of(id) {
            self.graph.unlink_raw(from, label, to);
            self.journal.push(Undo::Unlinked((from, label, to)));
        }
        let entity = self
            .graph
            .entities
            .remove(&id)
            .ok_or_else(|| Error::not_found("Entity", id))?;
        self.journal.push(Undo::Removed(entity.clone()));
        self.events.push(GraphEvent::EntityRemoved {
            id,
            kind: entity.kind(),
        });
        Ok(entity)
    }

    /// Claim `asset` for `node` if it is still available.
    ///
    /// Returns false when another node got there first.
    pub fn claim(&mut self, node: EntityId, asset: EntityId) -> Result<bool> {
        self.graph.find_kind(node, EntityKind::ComposedNode)?;
        let entity = self.graph.find(asset)?;
        if !entity.kind().is_claimable() {
            return Err(Error::Consistency(format!(
                "{} {} cannot be claimed",
                entity.kind(),
                asset
            )));
        }
        if !self.graph.is_available(entity) {
            return Ok(false);
        }
        self.link(node, LinkLabel::Includes, asset)?;
        self.events.push(GraphEvent::AssetClaimed { node, asset });
        Ok(true)
    }

    /// Release a claim held by `node`
    pub fn release(&mut self, node: EntityId, asset: EntityId) -> bool {
        let released = self.unlink(node, LinkLabel::Includes, asset);
        if released {
            self.events.push(GraphEvent::AssetReleased { node, asset });
        }
        released
    }

    /// Buffer an event to publish on commit
    pub fn emit(&mut self, event: GraphEvent) {
        self.events.push(event);
    }

    /// Make the changes durable and publish buffered events.
    ///
    /// Returns the number of published events.
    pub fn commit(mut self) -> usize {
        self.committed = true;
        self.journal.clear();
        let events = std::mem::take(&mut self.events);
        let count = events.len();
        for event in events {
            // No subscribers is fine
            let _ = self.event_sender.send(event);
        }
        count
    }

    fn rollback(&mut self) {
        let undone = self.journal.len();
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Inserted(id) => {
                    self.graph.entities.remove(&id);
                }
                Undo::Replaced(entity) | Undo::Removed(entity) => {
                    self.graph.entities.insert(entity.id, entity);
                }
                Undo::Linked((from, label, to)) => {
                    self.graph.unlink_raw(from, label, to);
                }
                Undo::Unlinked((from, label, to)) => {
                    self.graph.link_raw(from, label, to);
                }
                Undo::NextId(next_id) => self.graph.next_id = next_id,
            }
        }
        self.events.clear();
        debug!(undone, "Rolled back uncommitted unit of work");
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.journal.is_empty() {
            self.rollback();
        }
    }
}

// =============================================================================
// Graph Store
// =============================================================================

/// Shared read access to the graph
pub type GraphView<'a> = RwLockReadGuard<'a, Graph>;

/// The shared resource graph
pub struct GraphStore {
    graph: RwLock<Graph>,
    event_sender: broadcast::Sender<GraphEvent>,
}

impl GraphStore {
    /// Create an empty graph store
    pub fn new() -> Arc<Self> {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            graph: RwLock::new(Graph::default()),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_sender.subscribe()
    }

    /// Shared, read-only view
    pub fn read(&self) -> GraphView<'_> {
        self.graph.read()
    }

    /// Start an exclusive unit of work
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            graph: self.graph.write(),
            journal: Vec::new(),
            events: Vec::new(),
            event_sender: &self.event_sender,
            committed: false,
        }
    }

    /// Owned copy of an entity
    pub fn find(&self, id: EntityId) -> Result<Entity> {
        self.read().find(id).cloned()
    }

    pub fn free_assets(&self, kind: EntityKind) -> usize {
        self.read().free_assets(kind)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
