//! The cached key table: an arena of schema nodes describing one level of
//! keys each.
//!
//! Nodes are created only while schema messages arrive; the first value batch
//! seals the tree. Nothing is ever removed mid-session, so the arena owns all
//! nodes flatly and teardown is a single drop.

use bitflags::bitflags;
use thiserror::Error;

use crate::wire::AttrKind;

bitflags! {
    /// Rendering style bits for a container key.
    ///
    /// SEQUENCE and MAPPING may co-occur (a sequence of mappings); FLOW
    /// replaces block indentation entirely.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFormat: u16 {
        /// Render as `{...}` / `[...]` on a single line.
        const FLOW = 1;
        /// Children are sequence elements introduced by `- `.
        const SEQUENCE = 2;
        /// Children are `key: value` entries.
        const MAPPING = 4;
        /// Close marker; protocol vocabulary, never cached in a key table.
        const END = 8;
    }
}

/// One key slot of a schema level. Immutable after construction except for
/// label-text replacement on the inbound path.
#[derive(Debug, Clone)]
pub struct KeyDescriptor {
    /// 1-based slot position; 0 is the reserved sentinel.
    pub index: u16,
    /// Key text; may be empty at the root.
    pub name: String,
    /// How values for this key are interpreted.
    pub kind: AttrKind,
    /// Rendering style; meaningful for container keys only.
    pub format: KeyFormat,
    /// Default text emitted when a scalar slot has no value attribute.
    pub default: Option<String>,
}

/// Arena index of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

#[derive(Debug)]
struct SchemaNode {
    max_index: u16,
    keys: Vec<Option<KeyDescriptor>>,
    children: Vec<NodeId>,
}

/// Structural errors while building or addressing the key table.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Slot 0 is reserved and never describes a user key.
    #[error("key slot 0 is reserved")]
    SentinelSlot,

    /// A record addressed a slot past the declared table size.
    #[error("key slot {index} out of range (table holds {max})")]
    SlotOutOfRange {
        /// Offending slot index.
        index: u16,
        /// Declared slot count.
        max: u16,
    },

    /// Two records populated the same slot.
    #[error("key slot {index} set twice")]
    DuplicateSlot {
        /// Offending slot index.
        index: u16,
    },

    /// A key-table update arrived after the first value batch.
    #[error("key table update after values were seen")]
    Sealed,

    /// A second root-level table was announced.
    #[error("key table root already exists")]
    RootExists,

    /// A nested key has no child level in the table.
    #[error("nested key has no child level (ordinal {ordinal})")]
    NoChild {
        /// Declaration-order position of the missing child.
        ordinal: usize,
    },
}

/// The cached schema tree for one session.
#[derive(Debug, Default)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
    root: Option<NodeId>,
    sealed: bool,
}

impl SchemaTree {
    /// An empty, unsealed tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any level has been cached yet.
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The root level, if the schema phase has produced one.
    pub const fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Whether the tree is frozen by an already-seen value batch.
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freeze the tree at the schema/value phase boundary.
    pub const fn seal(&mut self) {
        self.sealed = true;
    }

    /// Drop every cached level. Called at session end.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// Allocate a level with `max_index` slots (sentinel included) and link
    /// it as the last child of `parent`, or as the root.
    pub fn insert_node(
        &mut self,
        parent: Option<NodeId>,
        max_index: u16,
    ) -> Result<NodeId, SchemaError> {
        if self.sealed {
            return Err(SchemaError::Sealed);
        }
        if parent.is_none() && self.root.is_some() {
            return Err(SchemaError::RootExists);
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SchemaNode {
            max_index,
            keys: (0..max_index).map(|_| None).collect(),
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p.0 as usize].children.push(id),
            None => self.root = Some(id),
        }
        Ok(id)
    }

    /// Populate one key slot. Setting a slot twice is an error.
    pub fn set_key(&mut self, node: NodeId, desc: KeyDescriptor) -> Result<(), SchemaError> {
        if self.sealed {
            return Err(SchemaError::Sealed);
        }
        let level = &mut self.nodes[node.0 as usize];
        if desc.index == 0 {
            return Err(SchemaError::SentinelSlot);
        }
        if desc.index >= level.max_index {
            return Err(SchemaError::SlotOutOfRange { index: desc.index, max: level.max_index });
        }
        let slot = &mut level.keys[desc.index as usize];
        if slot.is_some() {
            return Err(SchemaError::DuplicateSlot { index: desc.index });
        }
        *slot = Some(desc);
        Ok(())
    }

    /// The key at `index` of `node`, if populated.
    pub fn key(&self, node: NodeId, index: u16) -> Option<&KeyDescriptor> {
        self.nodes[node.0 as usize].keys.get(index as usize)?.as_ref()
    }

    /// Replace a key's stored text; the inbound label path uses this when a
    /// value attribute renames the group.
    pub fn replace_key_name(&mut self, node: NodeId, index: u16, name: &str) {
        if let Some(Some(key)) = self.nodes[node.0 as usize].keys.get_mut(index as usize) {
            name.clone_into(&mut key.name);
        }
    }

    /// The `ordinal`-th nested child of `node`, in declaration order.
    pub fn child_of(&self, node: NodeId, ordinal: usize) -> Option<NodeId> {
        self.nodes[node.0 as usize].children.get(ordinal).copied()
    }

    /// Declared slot count of `node`, sentinel included.
    pub fn max_index(&self, node: NodeId) -> u16 {
        self.nodes[node.0 as usize].max_index
    }

    /// Materialize the per-slot expected-kind table for a value batch at
    /// `node`. Unpopulated slots come out as `Unspec` and are skipped by the
    /// parse policy.
    pub fn policy_for(&self, node: NodeId) -> Vec<AttrKind> {
        let level = &self.nodes[node.0 as usize];
        level
            .keys
            .iter()
            .map(|slot| slot.as_ref().map_or(AttrKind::Unspec, |key| key.kind))
            .collect()
    }
}
