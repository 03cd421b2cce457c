//! Layered placement of the free part of the visible forest.
//!
//! Ranks are relative to the free subgraph's own roots and siblings keep
//! their insertion order. Every free node owns a cross-axis interval at
//! least one sibling spacing wide, and a parent's interval covers the
//! intervals of its children, so adjacent siblings never end up closer
//! than the sibling spacing and children stay centered on their parent.
//!
//! Free roots whose parent is frozen are hung below that parent, after any
//! frozen children it already shows. Free roots without a parent go to the
//! side of everything frozen.

use tracing::{debug, trace, warn};

use crate::common::collections::HashMap;
use crate::common::config::{LayoutSettings, Spacing};
use crate::layout_engine::{Direction, Orientation};
use crate::model::geometry::Point;
use crate::model::tree::NodeId;

/// Free nodes to place plus the frozen positions they may hang from.
#[derive(Debug, Default, Clone)]
pub struct Subgraph {
    free: Vec<FreeNode>,
    frozen: HashMap<NodeId, Point>,
    frozen_children: HashMap<NodeId, Vec<Point>>,
    frozen_roots: Vec<Point>,
}

#[derive(Debug, Clone)]
struct FreeNode {
    id: NodeId,
    parent: Option<NodeId>,
}

impl Subgraph {
    pub fn new() -> Self { Self::default() }

    /// Free nodes must be added in visible pre-order.
    pub fn add_free(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.free.push(FreeNode { id, parent });
    }

    pub fn add_frozen(&mut self, id: NodeId, parent: Option<&NodeId>, position: Point) {
        match parent {
            Some(parent) => self.frozen_children.entry(parent.clone()).or_default().push(position),
            None => self.frozen_roots.push(position),
        }
        self.frozen.insert(id, position);
    }

    pub fn free_len(&self) -> usize { self.free.len() }

    pub fn is_empty(&self) -> bool { self.free.is_empty() }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Root {
    /// Hangs below a frozen node.
    Anchored(usize),
    Detached,
}

#[derive(Debug, Clone)]
pub struct LayeredLayout {
    direction: Direction,
    settings: LayoutSettings,
}

impl LayeredLayout {
    pub fn new(settings: &LayoutSettings) -> Self {
        LayeredLayout {
            direction: settings.direction,
            settings: settings.clone(),
        }
    }

    fn orientation(&self) -> Orientation { self.direction.orientation() }

    /// Computes a position for every free node of `graph`, in the order the
    /// nodes were added.
    pub fn compute(&self, graph: &Subgraph) -> Vec<(NodeId, Point)> {
        if graph.is_empty() {
            return Vec::new();
        }
        let spacing = self.settings.spacing_for(graph.free_len());
        let index: HashMap<&NodeId, usize> =
            graph.free.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); graph.free.len()];
        let mut roots: Vec<(usize, Root)> = Vec::new();
        let mut anchors: Vec<&NodeId> = Vec::new();
        let mut edges = 0;
        for (i, node) in graph.free.iter().enumerate() {
            let Some(parent) = &node.parent else {
                roots.push((i, Root::Detached));
                continue;
            };
            if let Some(&p) = index.get(parent).filter(|&&p| p < i) {
                children[p].push(i);
                edges += 1;
            } else if graph.frozen.contains_key(parent) {
                let slot = match anchors.iter().position(|a| *a == parent) {
                    Some(slot) => slot,
                    None => {
                        anchors.push(parent);
                        anchors.len() - 1
                    }
                };
                roots.push((i, Root::Anchored(slot)));
                edges += 1;
            } else {
                warn!(node = %node.id, %parent, "parent missing from layout pass, placing as a root");
                roots.push((i, Root::Detached));
            }
        }

        debug!(
            free = graph.free.len(),
            edges,
            sibling = spacing.sibling,
            rank = spacing.rank,
            "layered layout"
        );

        if edges == 0 {
            return self.row(graph, spacing);
        }

        let widths = Self::widths(&children, spacing);
        let mut out = vec![Point::ORIGIN; graph.free.len()];

        for (slot, anchor) in anchors.iter().enumerate() {
            let group: Vec<usize> = roots
                .iter()
                .filter(|(_, r)| *r == Root::Anchored(slot))
                .map(|(i, _)| *i)
                .collect();
            let anchor_pos = graph.frozen[*anchor];
            let total: f64 = group.iter().map(|&i| widths[i]).sum();
            let start = match graph.frozen_children.get(*anchor) {
                Some(existing) if !existing.is_empty() => {
                    self.max_cross(existing.iter()) + spacing.sibling / 2.0
                }
                _ => anchor_pos.cross(self.orientation()) - total / 2.0,
            };
            let along = anchor_pos.along(self.orientation()) + self.direction.sign() * spacing.rank;
            self.place_group(&group, start, along, &children, &widths, spacing, &mut out);
        }

        let detached: Vec<usize> =
            roots.iter().filter(|(_, r)| *r == Root::Detached).map(|(i, _)| *i).collect();
        if !detached.is_empty() {
            let total: f64 = detached.iter().map(|&i| widths[i]).sum();
            let (start, along) = self.detached_origin(graph, total, spacing);
            self.place_group(&detached, start, along, &children, &widths, spacing, &mut out);
        }

        graph.free.iter().map(|n| n.id.clone()).zip(out).collect()
    }

    /// Isolated nodes: one evenly spaced row beside the frozen content.
    fn row(&self, graph: &Subgraph, spacing: Spacing) -> Vec<(NodeId, Point)> {
        debug!(count = graph.free.len(), "no edges, placing as a row");
        let total = graph.free.len() as f64 * spacing.sibling;
        let (start, along) = self.detached_origin(graph, total, spacing);
        graph
            .free
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let cross = start + spacing.sibling * (i as f64 + 0.5);
                let pos = Point::from_axes(self.orientation(), along, cross);
                trace!(node = %node.id, ?pos, "row");
                (node.id.clone(), pos)
            })
            .collect()
    }

    /// Interval start and along coordinate for parentless free roots.
    fn detached_origin(&self, graph: &Subgraph, total: f64, spacing: Spacing) -> (f64, f64) {
        if graph.frozen.is_empty() {
            return (-total / 2.0, 0.0);
        }
        let start = self.max_cross(graph.frozen.values()) + spacing.sibling / 2.0;
        let along = graph
            .frozen_roots
            .iter()
            .map(|p| p.along(self.orientation()))
            .reduce(|a, b| if self.direction.sign() > 0.0 { a.min(b) } else { a.max(b) })
            .unwrap_or(0.0);
        (start, along)
    }

    fn max_cross<'a>(&self, points: impl Iterator<Item = &'a Point>) -> f64 {
        points.map(|p| p.cross(self.orientation())).fold(f64::NEG_INFINITY, f64::max)
    }

    // Free nodes come in pre-order, so walking backwards sees every child
    // before its parent.
    fn widths(children: &[Vec<usize>], spacing: Spacing) -> Vec<f64> {
        let mut widths = vec![spacing.sibling; children.len()];
        for i in (0..children.len()).rev() {
            let sum: f64 = children[i].iter().map(|&c| widths[c]).sum();
            widths[i] = sum.max(spacing.sibling);
        }
        widths
    }

    #[allow(clippy::too_many_arguments)]
    fn place_group(
        &self,
        group: &[usize],
        start: f64,
        along: f64,
        children: &[Vec<usize>],
        widths: &[f64],
        spacing: Spacing,
        out: &mut [Point],
    ) {
        let step = self.direction.sign() * spacing.rank;
        let mut stack: Vec<(usize, f64, f64)> = Vec::new();
        let mut cursor = start;
        for &root in group {
            stack.push((root, cursor, along));
            cursor += widths[root];
        }
        while let Some((i, start, along)) = stack.pop() {
            let center = start + widths[i] / 2.0;
            out[i] = Point::from_axes(self.orientation(), along, center);
            trace!(index = i, pos = ?out[i], "placed");
            let total: f64 = children[i].iter().map(|&c| widths[c]).sum();
            let mut cursor = center - total / 2.0;
            for &child in &children[i] {
                stack.push((child, cursor, along + step));
                cursor += widths[child];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn layout() -> LayeredLayout { LayeredLayout::new(&LayoutSettings::default()) }

    fn at(placed: &[(NodeId, Point)], id: &str) -> Point {
        placed.iter().find(|(n, _)| n.as_str() == id).map(|(_, p)| *p).unwrap()
    }

    fn free(graph: &mut Subgraph, id: &str, parent: Option<&str>) {
        graph.add_free(id.into(), parent.map(NodeId::from));
    }

    #[test]
    fn ranks_grow_down_and_children_center_on_parent() {
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        free(&mut g, "A", Some("R"));
        free(&mut g, "C", Some("A"));
        free(&mut g, "B", Some("R"));
        let placed = layout().compute(&g);

        assert_eq!(at(&placed, "R"), Point::new(0.0, 0.0));
        assert_eq!(at(&placed, "A"), Point::new(-40.0, 60.0));
        assert_eq!(at(&placed, "B"), Point::new(40.0, 60.0));
        assert_eq!(at(&placed, "C"), Point::new(-40.0, 120.0));
    }

    #[test]
    fn adjacent_siblings_keep_spacing_with_uneven_subtrees() {
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        for parent in ["A", "B", "C"] {
            free(&mut g, parent, Some("R"));
            for i in 0..3 {
                free(&mut g, &format!("{parent}{i}"), Some(parent));
            }
        }
        let placed = layout().compute(&g);
        let rank1: Vec<f64> = ["A", "B", "C"].iter().map(|id| at(&placed, id).x).collect();
        for pair in rank1.windows(2) {
            assert!(pair[1] - pair[0] >= 80.0, "{pair:?}");
        }
        let rank2: Vec<f64> = placed
            .iter()
            .filter(|(_, p)| p.y == 120.0)
            .map(|(_, p)| p.x)
            .collect();
        assert_eq!(rank2.len(), 9);
        for pair in rank2.windows(2) {
            assert!(pair[1] - pair[0] >= 80.0, "{pair:?}");
        }
    }

    #[test]
    fn sibling_order_is_preserved() {
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        for id in ["z", "a", "m"] {
            free(&mut g, id, Some("R"));
        }
        let placed = layout().compute(&g);
        assert!(at(&placed, "z").x < at(&placed, "a").x);
        assert!(at(&placed, "a").x < at(&placed, "m").x);
    }

    #[test]
    fn isolated_nodes_form_a_row() {
        let mut g = Subgraph::new();
        for id in ["a", "b", "c"] {
            free(&mut g, id, None);
        }
        let placed = layout().compute(&g);
        assert_eq!(
            placed.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![Point::new(-80.0, 0.0), Point::new(0.0, 0.0), Point::new(80.0, 0.0)]
        );
    }

    #[test]
    fn isolated_root_goes_beside_frozen_content() {
        let mut g = Subgraph::new();
        g.add_frozen("R".into(), None, Point::new(0.0, 0.0));
        g.add_frozen("A".into(), Some(&"R".into()), Point::new(-40.0, 60.0));
        g.add_frozen("B".into(), Some(&"R".into()), Point::new(40.0, 60.0));
        free(&mut g, "D", None);
        let placed = layout().compute(&g);
        assert_eq!(at(&placed, "D"), Point::new(120.0, 0.0));
    }

    #[test]
    fn free_children_hang_after_frozen_siblings() {
        let mut g = Subgraph::new();
        g.add_frozen("R".into(), None, Point::new(0.0, 0.0));
        g.add_frozen("A".into(), Some(&"R".into()), Point::new(-40.0, 60.0));
        g.add_frozen("B".into(), Some(&"R".into()), Point::new(40.0, 60.0));
        free(&mut g, "N", Some("R"));
        free(&mut g, "N1", Some("N"));
        let placed = layout().compute(&g);
        assert_eq!(at(&placed, "N"), Point::new(120.0, 60.0));
        assert_eq!(at(&placed, "N1"), Point::new(120.0, 120.0));
    }

    #[test]
    fn free_children_center_under_childless_anchor() {
        let mut g = Subgraph::new();
        g.add_frozen("R".into(), None, Point::new(500.0, 100.0));
        free(&mut g, "a", Some("R"));
        free(&mut g, "b", Some("R"));
        let placed = layout().compute(&g);
        assert_eq!(at(&placed, "a"), Point::new(460.0, 160.0));
        assert_eq!(at(&placed, "b"), Point::new(540.0, 160.0));
    }

    #[test]
    fn dangling_parent_becomes_a_root() {
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        free(&mut g, "A", Some("R"));
        free(&mut g, "lost", Some("nowhere"));
        let placed = layout().compute(&g);
        assert_eq!(placed.len(), 3);
        assert_eq!(at(&placed, "lost").y, 0.0);
        assert_ne!(at(&placed, "lost"), at(&placed, "R"));
    }

    #[test]
    fn horizontal_growth_swaps_axes() {
        let settings = LayoutSettings {
            direction: Direction::Left,
            ..LayoutSettings::default()
        };
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        free(&mut g, "A", Some("R"));
        let placed = LayeredLayout::new(&settings).compute(&g);
        assert_eq!(at(&placed, "R"), Point::new(0.0, 0.0));
        assert_eq!(at(&placed, "A"), Point::new(-60.0, 0.0));
    }

    #[test]
    fn large_subgraphs_use_wider_spacing() {
        let settings = LayoutSettings {
            medium_threshold: 2,
            large_threshold: 100,
            ..LayoutSettings::default()
        };
        let mut g = Subgraph::new();
        free(&mut g, "R", None);
        free(&mut g, "A", Some("R"));
        free(&mut g, "B", Some("R"));
        let placed = LayeredLayout::new(&settings).compute(&g);
        assert_eq!(at(&placed, "B").x - at(&placed, "A").x, 120.0);
        assert_eq!(at(&placed, "A").y, 90.0);
    }

    #[test]
    fn empty_subgraph_places_nothing() {
        assert!(layout().compute(&Subgraph::new()).is_empty());
    }
}
