//! Structural fingerprints of the visible forest.
//!
//! A [`Signature`] only captures shape: which nodes are visible, how deep
//! they sit, how many children they own and whether they are expanded.
//! Positions, labels, colors and selection never participate, so edits to
//! them can never cause a relayout.

use serde::{Deserialize, Serialize};

use crate::common::collections::{HashMap, HashSet};
use crate::model::geometry::Point;
use crate::model::tree::{NodeId, TreeModel, VisibleNode};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub id: NodeId,
    pub depth: usize,
    pub child_count: usize,
    pub expanded: bool,
}

impl SignatureEntry {
    fn from_visible(v: &VisibleNode<'_>) -> Self {
        SignatureEntry {
            id: v.id().clone(),
            depth: v.depth,
            child_count: v.node.child_count(),
            expanded: v.node.expanded(),
        }
    }

    fn same_shape(&self, other: &SignatureEntry) -> bool {
        self.child_count == other.child_count && self.expanded == other.expanded
    }
}

/// Ordered (pre-order) fingerprint of the visible forest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<SignatureEntry>);

/// A change confined to one node's expand/collapse (or its child list).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsolatedChange {
    pub node: NodeId,
    /// Newly visible descendants, in pre-order.
    pub revealed: Vec<NodeId>,
    /// Descendants that are no longer visible.
    pub hidden: Vec<NodeId>,
}

impl Signature {
    pub fn of(tree: &TreeModel) -> Self { Self::from_visible(&tree.visible()) }

    pub fn from_visible(visible: &[VisibleNode<'_>]) -> Self {
        Signature(visible.iter().map(SignatureEntry::from_visible).collect())
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn structure_changed(&self, current: &Signature) -> bool { self != current }

    /// Treats `self` as the previous signature and checks whether `current`
    /// differs from it only inside one node's subtree, with that node being
    /// the only one whose own entry changed.
    pub fn isolate_change(&self, current: &Signature) -> Option<IsolatedChange> {
        let prev_index: HashMap<&NodeId, usize> =
            self.0.iter().enumerate().map(|(i, e)| (&e.id, i)).collect();

        let mut changed = None;
        for (ci, entry) in current.0.iter().enumerate() {
            let Some(&pi) = prev_index.get(&entry.id) else { continue };
            let before = &self.0[pi];
            if before.depth != entry.depth {
                return None;
            }
            if !before.same_shape(entry) {
                if changed.is_some() {
                    return None;
                }
                changed = Some((pi, ci));
            }
        }
        let (pi, ci) = changed?;

        let prev_end = self.block_end(pi);
        let cur_end = current.block_end(ci);
        let prev_outside = self.0[..pi].iter().chain(&self.0[prev_end..]);
        let cur_outside = current.0[..ci].iter().chain(&current.0[cur_end..]);
        if !prev_outside.eq(cur_outside) {
            return None;
        }

        let prev_block: HashSet<&NodeId> = self.0[pi + 1..prev_end].iter().map(|e| &e.id).collect();
        let cur_block: HashSet<&NodeId> =
            current.0[ci + 1..cur_end].iter().map(|e| &e.id).collect();
        let revealed = current.0[ci + 1..cur_end]
            .iter()
            .filter(|e| !prev_block.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();
        let hidden = self.0[pi + 1..prev_end]
            .iter()
            .filter(|e| !cur_block.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();

        Some(IsolatedChange {
            node: current.0[ci].id.clone(),
            revealed,
            hidden,
        })
    }

    /// One past the last index of the subtree block rooted at `start`.
    fn block_end(&self, start: usize) -> usize {
        let depth = self.0[start].depth;
        self.0[start + 1..]
            .iter()
            .position(|e| e.depth <= depth)
            .map_or(self.0.len(), |offset| start + 1 + offset)
    }
}

/// Positions and shape captured after the last successful reconciliation.
///
/// Only used for diffing; the tree model stays authoritative.
#[derive(Clone, Debug, Default)]
pub struct LayoutSnapshot {
    signature: Signature,
    positions: HashMap<NodeId, Point>,
}

impl LayoutSnapshot {
    pub fn capture(tree: &TreeModel) -> Self {
        let visible = tree.visible();
        LayoutSnapshot {
            signature: Signature::from_visible(&visible),
            positions: visible.iter().map(|v| (v.id().clone(), v.node.position())).collect(),
        }
    }

    /// A snapshot whose shape came from elsewhere (a saved layout). Only
    /// nodes listed in `positions` count as previously visible.
    pub fn seeded(signature: Signature, positions: impl IntoIterator<Item = (NodeId, Point)>) -> Self {
        LayoutSnapshot {
            signature,
            positions: positions.into_iter().collect(),
        }
    }

    pub fn signature(&self) -> &Signature { &self.signature }

    pub fn was_visible(&self, id: &NodeId) -> bool { self.positions.contains_key(id) }
}
