//! Decides what a reconciliation pass recomputes and writes the results
//! back into the tree.
//!
//! Only nodes computed by the pass get `set_position`; frozen and untouched
//! nodes are never rewritten.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::common::collections::{HashMap, HashSet};
use crate::common::config::{Config, LayoutSettings};
use crate::layout_engine::layered::{LayeredLayout, Subgraph};
use crate::layout_engine::stacking::{StackingDetector, StackingReport};
use crate::model::geometry::Point;
use crate::model::signature::{IsolatedChange, LayoutSnapshot, Signature};
use crate::model::tree::{NodeId, TreeModel, VisibleNode};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PassKind {
    NoOp,
    LocalFanout,
    FullRelayout,
    Initial,
}

/// Which nodes were placed by a user and which have a position at all.
#[derive(Debug, Default, Clone)]
pub struct Placements {
    manual: HashSet<NodeId>,
    placed: HashSet<NodeId>,
}

impl Placements {
    pub fn is_manual(&self, id: &NodeId) -> bool { self.manual.contains(id) }

    pub fn is_placed(&self, id: &NodeId) -> bool { self.placed.contains(id) }

    pub fn mark_manual(&mut self, id: NodeId) {
        self.placed.insert(id.clone());
        self.manual.insert(id);
    }

    pub fn mark_placed(&mut self, id: NodeId) { self.placed.insert(id); }

    pub fn forget<'a>(&mut self, ids: impl IntoIterator<Item = &'a NodeId>) {
        for id in ids {
            self.manual.remove(id);
            self.placed.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.manual.clear();
        self.placed.clear();
    }

    pub fn manual(&self) -> impl Iterator<Item = &NodeId> + '_ { self.manual.iter() }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub kind: PassKind,
    /// Visible node ids after the pass, in pre-order.
    pub visible: Vec<NodeId>,
    /// Positions written by this pass, in visible order.
    pub moved: Vec<(NodeId, Point)>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    layout: LayeredLayout,
    detector: StackingDetector,
    settings: LayoutSettings,
}

impl Reconciler {
    pub fn new(config: &Config) -> Self {
        Reconciler {
            layout: LayeredLayout::new(&config.layout),
            detector: StackingDetector::new(&config.stacking),
            settings: config.layout.clone(),
        }
    }

    /// Runs one pass against `previous`, the snapshot taken after the last
    /// pass. A missing or empty snapshot means the pass is `INITIAL`.
    #[instrument(level = "debug", skip_all, fields(nodes = tree.len()))]
    pub fn reconcile(
        &self,
        tree: &mut TreeModel,
        previous: Option<&LayoutSnapshot>,
        placements: &mut Placements,
    ) -> PassOutcome {
        let visible = tree.visible();
        let current = Signature::from_visible(&visible);
        let previous = previous.filter(|snap| !snap.signature().is_empty());
        let pinned = Self::pinned(&visible, previous, placements);

        // User placements may overlap freely; only the rest can be stacked.
        let stacking = self.detector.inspect(
            visible
                .iter()
                .filter(|v| placements.is_placed(v.id()) && !pinned.contains(v.id()))
                .map(|v| (v.id(), v.node.position())),
        );
        if stacking.stacked {
            warn!(
                nodes = stacking.node_count,
                cells = stacking.distinct_cells,
                "layout looks stacked, forcing a relayout"
            );
        }

        let all_placed = visible.iter().all(|v| placements.is_placed(v.id()));
        let (kind, change) = match previous {
            None => (PassKind::Initial, None),
            Some(_) if stacking.stacked => (PassKind::FullRelayout, None),
            Some(prev) if !prev.signature().structure_changed(&current) => {
                if all_placed {
                    (PassKind::NoOp, None)
                } else {
                    (PassKind::FullRelayout, None)
                }
            }
            Some(prev) => match prev.signature().isolate_change(&current) {
                // A fan-out only places revealed nodes, so anything else
                // still lacking a position needs the full pass.
                Some(change)
                    if visible
                        .iter()
                        .all(|v| placements.is_placed(v.id()) || change.revealed.contains(v.id())) =>
                {
                    (PassKind::LocalFanout, Some(change))
                }
                _ => (PassKind::FullRelayout, None),
            },
        };
        debug!(%kind, visible = visible.len(), pinned = pinned.len(), "classified pass");

        let moved = match (kind, change) {
            (PassKind::NoOp, _) => Vec::new(),
            (PassKind::LocalFanout, Some(change)) => {
                self.fan_out(tree, &visible, &change, placements)
            }
            _ => {
                let frozen = self.frozen_set(&visible, kind, previous, placements, pinned, &stacking);
                self.relayout(&visible, &frozen)
            }
        };
        let visible_ids: Vec<NodeId> = visible.iter().map(|v| v.id().clone()).collect();
        drop(visible);

        for (id, pos) in &moved {
            trace!(node = %id, ?pos, "set position");
            // Every computed id comes from the visible forest just walked.
            if tree.set_position(id, *pos).is_ok() {
                placements.mark_placed(id.clone());
            }
        }

        PassOutcome {
            kind,
            visible: visible_ids,
            moved,
        }
    }

    /// Manual nodes and the descendants that ride along with them. A
    /// descendant only rides along once it has a position of its own;
    /// unplaced ones stay free so the layout can hang them off their anchor.
    fn pinned(
        visible: &[VisibleNode<'_>],
        previous: Option<&LayoutSnapshot>,
        placements: &Placements,
    ) -> HashSet<NodeId> {
        // Pre-order sees every parent first.
        let mut pinned: HashSet<NodeId> = HashSet::default();
        for v in visible {
            let rides_along = v.parent.is_some_and(|p| pinned.contains(p))
                && (placements.is_placed(v.id())
                    || previous.is_some_and(|snap| snap.was_visible(v.id())));
            if placements.is_manual(v.id()) || rides_along {
                pinned.insert(v.id().clone());
            }
        }
        pinned
    }

    fn frozen_set(
        &self,
        visible: &[VisibleNode<'_>],
        kind: PassKind,
        previous: Option<&LayoutSnapshot>,
        placements: &Placements,
        pinned: HashSet<NodeId>,
        stacking: &StackingReport,
    ) -> HashSet<NodeId> {
        let pinned_len = pinned.len();
        let mut frozen = pinned;
        match kind {
            PassKind::Initial => {}
            _ if stacking.stacked => {
                let crowded: HashSet<&NodeId> = stacking.crowded().flatten().collect();
                frozen.extend(
                    visible
                        .iter()
                        .map(VisibleNode::id)
                        .filter(|id| placements.is_placed(id) && !crowded.contains(id))
                        .cloned(),
                );
            }
            _ => {
                frozen.extend(
                    visible
                        .iter()
                        .map(VisibleNode::id)
                        .filter(|id| {
                            placements.is_placed(id)
                                || previous.is_some_and(|snap| snap.was_visible(id))
                        })
                        .cloned(),
                );
            }
        }
        debug!(pinned = pinned_len, frozen = frozen.len(), "partitioned visible forest");
        frozen
    }

    fn relayout(&self, visible: &[VisibleNode<'_>], frozen: &HashSet<NodeId>) -> Vec<(NodeId, Point)> {
        let mut graph = Subgraph::new();
        for v in visible {
            if frozen.contains(v.id()) {
                graph.add_frozen(v.id().clone(), v.parent, v.node.position());
            } else {
                graph.add_free(v.id().clone(), v.parent.cloned());
            }
        }
        debug!(free = graph.free_len(), "running layered layout");
        self.layout.compute(&graph)
    }

    /// Places revealed nodes that never had a position next to their parent.
    fn fan_out(
        &self,
        tree: &TreeModel,
        visible: &[VisibleNode<'_>],
        change: &IsolatedChange,
        placements: &Placements,
    ) -> Vec<(NodeId, Point)> {
        debug!(
            node = %change.node,
            revealed = change.revealed.len(),
            hidden = change.hidden.len(),
            "local fan-out"
        );
        let parents: HashMap<&NodeId, Option<&NodeId>> =
            visible.iter().map(|v| (v.id(), v.parent)).collect();

        // Groups of unplaced siblings keyed by parent, in first-seen order.
        let mut groups: Vec<(&NodeId, Vec<&NodeId>)> = Vec::new();
        for id in &change.revealed {
            if placements.is_placed(id) {
                continue;
            }
            let Some(&Some(parent)) = parents.get(id) else { continue };
            match groups.iter_mut().find(|(p, _)| *p == parent) {
                Some((_, members)) => members.push(id),
                None => groups.push((parent, vec![id])),
            }
        }

        let orientation = self.settings.direction.orientation();
        let offset = self.settings.direction.sign() * self.settings.fanout_offset();
        let spacing = self.settings.spacing_for(groups.iter().map(|(_, m)| m.len()).sum());

        let mut computed: HashMap<&NodeId, Point> = HashMap::default();
        let mut out = Vec::new();
        for (parent, members) in groups {
            let Some(parent_pos) = computed.get(parent).copied().or_else(|| tree.position(parent))
            else {
                continue;
            };
            // Siblings that already sit on screen push the new ones aside.
            let settled: Vec<f64> = tree
                .children(parent)
                .filter(|c| !members.contains(c) && placements.is_placed(c))
                .filter_map(|c| computed.get(c).copied().or_else(|| tree.position(c)))
                .map(|p| p.cross(orientation))
                .collect();
            let along = parent_pos.along(orientation) + offset;
            let first = match settled.iter().copied().reduce(f64::max) {
                Some(max) => max + spacing.sibling,
                None => {
                    parent_pos.cross(orientation)
                        - spacing.sibling * (members.len() as f64 - 1.0) / 2.0
                }
            };
            for (i, id) in members.into_iter().enumerate() {
                let pos = Point::from_axes(orientation, along, first + spacing.sibling * i as f64);
                computed.insert(id, pos);
                out.push((id.clone(), pos));
            }
        }
        out
    }
}
