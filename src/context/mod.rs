//! Hierarchical asset addresses
//!
//! A [`Context`] is the containment path from a root (Pod, Manager,
//! StorageService or ComposedNode) down to an entity, rendered as
//! `/Pods/1/Racks/2/Drawers/3/Modules/4/Blades/7/Processors/10`.

use crate::error::{Error, Result};
use crate::graph::{Entity, EntityId, EntityKind, Graph, GraphStore, LinkLabel};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound on containment depth
const MAX_DEPTH: usize = 16;

// =============================================================================
// Context
// =============================================================================

/// One step of a context path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub kind: EntityKind,
    pub id: EntityId,
}

/// Containment path to an entity; never empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Context {
    ancestors: Vec<Segment>,
    leaf: Segment,
}

impl Context {
    pub fn root(kind: EntityKind, id: EntityId) -> Self {
        Self {
            ancestors: Vec::new(),
            leaf: Segment { kind, id },
        }
    }

    pub fn child(&self, kind: EntityKind, id: EntityId) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.leaf);
        Self {
            ancestors,
            leaf: Segment { kind, id },
        }
    }

    /// Id of the addressed entity
    pub fn id(&self) -> EntityId {
        self.leaf.id
    }

    /// Kind of the addressed entity
    pub fn kind(&self) -> EntityKind {
        self.leaf.kind
    }

    pub fn parent(&self) -> Option<Context> {
        let mut ancestors = self.ancestors.clone();
        let leaf = ancestors.pop()?;
        Some(Self { ancestors, leaf })
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.ancestors.iter().chain(std::iter::once(&self.leaf))
    }

    pub fn depth(&self) -> usize {
        self.ancestors.len() + 1
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in self.segments() {
            write!(f, "/{}/{}", segment.kind.collection(), segment.id)?;
        }
        Ok(())
    }
}

fn kind_of_collection(collection: &str) -> Option<EntityKind> {
    use EntityKind::*;
    [
        Pod,
        Rack,
        Drawer,
        ComputeModule,
        Blade,
        Processor,
        Memory,
        LocalDrive,
        StorageService,
        RemoteDrive,
        RemoteTarget,
        NetworkInterface,
        Manager,
        ComposedNode,
    ]
    .into_iter()
    .find(|kind| kind.collection() == collection)
}

impl FromStr for Context {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = text.trim_matches('/').split('/').collect();
        if parts.len() < 2 || parts.len() % 2 != 0 {
            return Err(format!("'{}' is not a /Collection/id path", text));
        }
        let mut context: Option<Context> = None;
        for pair in parts.chunks(2) {
            let kind = kind_of_collection(pair[0])
                .ok_or_else(|| format!("unknown collection '{}' in '{}'", pair[0], text))?;
            let id = pair[1]
                .parse::<u64>()
                .map(EntityId)
                .map_err(|e| format!("bad id '{}' in '{}': {}", pair[1], text, e))?;
            context = Some(match context {
                None => Context::root(kind, id),
                Some(parent) => parent.child(kind, id),
            });
        }
        context.ok_or_else(|| format!("'{}' is empty", text))
    }
}

impl TryFrom<String> for Context {
    type Error = String;

    fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<Context> for String {
    fn from(context: Context) -> Self {
        context.to_string()
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve a context against the graph.
///
/// Every segment must exist with the stated kind and be contained by the
/// previous one; the first segment must be a root.
pub fn resolve<'g>(graph: &'g Graph, context: &Context) -> Result<&'g Entity> {
    let not_found = || Error::not_found("Context", context);
    let mut previous: Option<EntityId> = None;
    let mut resolved = None;

    for segment in context.segments() {
        let entity = graph
            .find_kind(segment.id, segment.kind)
            .map_err(|_| not_found())?;
        match previous {
            None if graph.container(entity.id)?.is_some() => return Err(not_found()),
            Some(parent) if !graph.has_link(parent, LinkLabel::Contains, entity.id) => {
                return Err(not_found())
            }
            _ => {}
        }
        previous = Some(entity.id);
        resolved = Some(entity);
    }

    resolved.ok_or_else(not_found)
}

/// Build the context of an entity by walking containment to its root
pub fn to_context(graph: &Graph, id: EntityId) -> Result<Context> {
    let mut chain = vec![graph.find(id)?];
    for _ in 0..MAX_DEPTH {
        let current = chain[chain.len() - 1];
        match graph.container(current.id)? {
            Some(parent) => chain.push(parent),
            None => {
                let mut segments = chain.iter().rev();
                let mut context = match segments.next() {
                    Some(root) => Context::root(root.kind(), root.id),
                    None => return Err(Error::not_found("Entity", id)),
                };
                for entity in segments {
                    context = context.child(entity.kind(), entity.id);
                }
                return Ok(context);
            }
        }
    }
    Err(Error::Consistency(format!(
        "containment of entity {} is deeper than {}",
        id, MAX_DEPTH
    )))
}

/// Context resolution against the shared store
pub struct ContextResolver {
    graph: Arc<GraphStore>,
}

impl ContextResolver {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    pub fn resolve(&self, context: &Context) -> Result<Entity> {
        resolve(&self.graph.read(), context).cloned()
    }

    pub fn to_context(&self, id: EntityId) -> Result<Context> {
        to_context(&self.graph.read(), id)
    }
}
