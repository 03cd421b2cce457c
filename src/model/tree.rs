//! The visible forest and its per-node state.
//!
//! Nodes live in a [`SlotMap`] arena and own their children as an ordered
//! list of arena keys. Parents are never stored; anything that needs parent
//! lookup derives it from a walk (see [`TreeModel::visible`]).
//!
//! The model never triggers layout. Callers mutate it and then ask the
//! engine to reconcile.

use std::fmt;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::common::collections::{HashMap, HashSet};
use crate::layout_engine::EngineError;
use crate::model::geometry::Point;

slotmap::new_key_type! {
    struct NodeKey;
}

/// Stable identifier of a node, unique across the visible forest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self { NodeId(id.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self { NodeId::new(id) }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self { NodeId(id) }
}

/// Provider-side description of a node and its materialized children.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub id: NodeId,
    /// Path used to re-associate the node across rebuilds. Defaults to the id.
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    /// A position the provider already knows (e.g. from its own cache).
    #[serde(default)]
    pub position: Option<Point>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>) -> Self {
        NodeSpec {
            id: id.into(),
            locator: None,
            label: None,
            icon: None,
            color: None,
            expanded: false,
            has_more: false,
            children: Vec::new(),
            position: None,
        }
    }

    pub fn expanded(mut self) -> Self {
        self.expanded = true;
        self
    }

    pub fn with_children(mut self, children: Vec<NodeSpec>) -> Self {
        self.children = children;
        self
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn at(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }
}

/// Display attribute edits. None of these are shape-relevant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Label(String),
    Icon(Option<String>),
    Color(Option<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    id: NodeId,
    locator: String,
    label: String,
    icon_ref: Option<String>,
    color_ref: Option<String>,
    position: Point,
    children: Vec<NodeKey>,
    expanded: bool,
    has_more: bool,
}

impl TreeNode {
    pub fn id(&self) -> &NodeId { &self.id }

    pub fn locator(&self) -> &str { &self.locator }

    pub fn label(&self) -> &str { &self.label }

    pub fn icon_ref(&self) -> Option<&str> { self.icon_ref.as_deref() }

    pub fn color_ref(&self) -> Option<&str> { self.color_ref.as_deref() }

    pub fn position(&self) -> Point { self.position }

    pub fn expanded(&self) -> bool { self.expanded }

    pub fn has_more(&self) -> bool { self.has_more }

    pub fn child_count(&self) -> usize { self.children.len() }
}

/// One node of the visible forest together with its derived context.
#[derive(Clone, Copy, Debug)]
pub struct VisibleNode<'a> {
    pub node: &'a TreeNode,
    pub parent: Option<&'a NodeId>,
    pub depth: usize,
}

impl<'a> VisibleNode<'a> {
    pub fn id(&self) -> &'a NodeId { &self.node.id }
}

/// `(parent, child)` pair between two visible nodes. Never stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DerivedEdge {
    pub parent: NodeId,
    pub child: NodeId,
}

/// What a structural mutation created and destroyed.
#[must_use]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Materialized {
    pub created: Vec<NodeId>,
    /// Created nodes whose spec carried a position.
    pub positioned: Vec<NodeId>,
    pub destroyed: Vec<NodeId>,
}

#[derive(Default, Debug)]
pub struct TreeModel {
    nodes: SlotMap<NodeKey, TreeNode>,
    index: HashMap<NodeId, NodeKey>,
    roots: Vec<NodeKey>,
}

impl TreeModel {
    pub fn new() -> Self { Self::default() }

    pub fn from_specs(specs: Vec<NodeSpec>) -> Result<(Self, Materialized), EngineError> {
        let mut tree = TreeModel::new();
        tree.ensure_fresh(&specs)?;
        let mut out = Materialized::default();
        for spec in specs {
            let key = tree.build(spec, &mut out);
            tree.roots.push(key);
        }
        Ok((tree, out))
    }

    /// Number of owned nodes, visible or not.
    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn contains(&self, id: &NodeId) -> bool { self.index.contains_key(id) }

    pub fn get(&self, id: &NodeId) -> Option<&TreeNode> {
        self.index.get(id).and_then(|&key| self.nodes.get(key))
    }

    pub fn position(&self, id: &NodeId) -> Option<Point> { self.get(id).map(|n| n.position) }

    /// Owned children of `id` in sibling order; empty for unknown ids.
    pub fn children<'a>(&'a self, id: &NodeId) -> impl Iterator<Item = &'a NodeId> + use<'a> {
        self.get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|&key| self.nodes.get(key))
            .map(|n| &n.id)
    }

    pub fn set_position(&mut self, id: &NodeId, position: Point) -> Result<(), EngineError> {
        self.node_mut(id)?.position = position;
        Ok(())
    }

    /// Returns whether the flag actually changed.
    pub fn set_expanded(&mut self, id: &NodeId, expanded: bool) -> Result<bool, EngineError> {
        let node = self.node_mut(id)?;
        let changed = node.expanded != expanded;
        node.expanded = expanded;
        Ok(changed)
    }

    pub fn set_attribute(&mut self, id: &NodeId, attribute: Attribute) -> Result<(), EngineError> {
        let node = self.node_mut(id)?;
        match attribute {
            Attribute::Label(label) => node.label = label,
            Attribute::Icon(icon) => node.icon_ref = icon,
            Attribute::Color(color) => node.color_ref = color,
        }
        Ok(())
    }

    pub fn set_has_more(&mut self, id: &NodeId, has_more: bool) -> Result<(), EngineError> {
        self.node_mut(id)?.has_more = has_more;
        Ok(())
    }

    /// Appends a new root (and its materialized subtree) to the forest.
    pub fn insert_root(&mut self, spec: NodeSpec) -> Result<Materialized, EngineError> {
        self.ensure_fresh(std::slice::from_ref(&spec))?;
        let mut out = Materialized::default();
        let key = self.build(spec, &mut out);
        self.roots.push(key);
        Ok(out)
    }

    pub fn remove_root(&mut self, id: &NodeId) -> Result<Materialized, EngineError> {
        let key = self.key(id)?;
        let Some(pos) = self.roots.iter().position(|&k| k == key) else {
            return Err(EngineError::NotARoot(id.clone()));
        };
        self.roots.remove(pos);
        let mut out = Materialized::default();
        self.destroy(key, &mut out);
        Ok(out)
    }

    /// Replaces the children of `id` with `specs`, in the given order.
    ///
    /// A spec naming a current child keeps that child and its whole subtree
    /// untouched (its nested `children` are ignored). Other specs are
    /// materialized as new subtrees, and current children not named are
    /// destroyed.
    pub fn replace_children(
        &mut self,
        id: &NodeId,
        specs: Vec<NodeSpec>,
    ) -> Result<Materialized, EngineError> {
        let parent = self.key(id)?;
        let current: HashMap<NodeId, NodeKey> = self.nodes[parent]
            .children
            .iter()
            .map(|&key| (self.nodes[key].id.clone(), key))
            .collect();

        let mut kept = HashSet::default();
        let mut fresh = Vec::new();
        for spec in &specs {
            if current.contains_key(&spec.id) {
                if !kept.insert(spec.id.clone()) {
                    return Err(EngineError::DuplicateNode(spec.id.clone()));
                }
            } else {
                fresh.push(spec.clone());
            }
        }
        self.ensure_fresh(&fresh)?;

        let mut out = Materialized::default();
        for (child_id, key) in &current {
            if !kept.contains(child_id) {
                self.destroy(*key, &mut out);
            }
        }
        let mut children = Vec::with_capacity(specs.len());
        for spec in specs {
            match current.get(&spec.id) {
                Some(&key) => children.push(key),
                None => children.push(self.build(spec, &mut out)),
            }
        }
        self.nodes[parent].children = children;
        Ok(out)
    }

    /// The visible forest in pre-order, honoring sibling order and `expanded`.
    pub fn visible(&self) -> Vec<VisibleNode<'_>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeKey, Option<NodeKey>, usize)> =
            self.roots.iter().rev().map(|&key| (key, None, 0)).collect();
        while let Some((key, parent, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(key) else { continue };
            if node.expanded {
                stack.extend(node.children.iter().rev().map(|&c| (c, Some(key), depth + 1)));
            }
            out.push(VisibleNode {
                node,
                parent: parent.and_then(|p| self.nodes.get(p)).map(|p| &p.id),
                depth,
            });
        }
        out
    }

    /// Every owned node in pre-order, hidden ones included.
    pub fn preorder(&self) -> Vec<&TreeNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeKey> = self.roots.iter().rev().copied().collect();
        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else { continue };
            stack.extend(node.children.iter().rev());
            out.push(node);
        }
        out
    }

    pub fn visible_edges(&self) -> Vec<DerivedEdge> {
        self.visible()
            .into_iter()
            .filter_map(|v| {
                v.parent.map(|parent| DerivedEdge {
                    parent: parent.clone(),
                    child: v.node.id.clone(),
                })
            })
            .collect()
    }

    /// Renders the visible forest for debug output.
    pub fn draw_tree(&self) -> String {
        let trees: Vec<_> = self.roots.iter().map(|&key| self.ascii_subtree(key)).collect();
        let forest = ascii_tree::Tree::Node("forest".to_string(), trees);
        let mut out = String::new();
        // Writing into a String cannot fail.
        _ = ascii_tree::write_tree(&mut out, &forest);
        out
    }

    fn ascii_subtree(&self, key: NodeKey) -> ascii_tree::Tree {
        let node = &self.nodes[key];
        let marker = match (node.expanded, node.children.is_empty(), node.has_more) {
            (_, _, true) => "… ",
            (true, false, _) => "▾ ",
            (false, false, _) => "▸ ",
            _ => "",
        };
        let desc = format!(
            "{marker}{} [{}] @ ({:.1}, {:.1})",
            node.label, node.id, node.position.x, node.position.y
        );
        if !node.expanded || node.children.is_empty() {
            return ascii_tree::Tree::Leaf(vec![desc]);
        }
        let children = node.children.iter().map(|&c| self.ascii_subtree(c)).collect();
        ascii_tree::Tree::Node(desc, children)
    }

    fn key(&self, id: &NodeId) -> Result<NodeKey, EngineError> {
        self.index.get(id).copied().ok_or_else(|| EngineError::UnknownNode(id.clone()))
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut TreeNode, EngineError> {
        let key = self.key(id)?;
        Ok(&mut self.nodes[key])
    }

    /// Fails if any id in `specs` (recursively) is already owned or repeated.
    fn ensure_fresh(&self, specs: &[NodeSpec]) -> Result<(), EngineError> {
        let mut seen = HashSet::default();
        let mut stack: Vec<&NodeSpec> = specs.iter().collect();
        while let Some(spec) = stack.pop() {
            if self.index.contains_key(&spec.id) || !seen.insert(&spec.id) {
                return Err(EngineError::DuplicateNode(spec.id.clone()));
            }
            stack.extend(spec.children.iter());
        }
        Ok(())
    }

    fn build(&mut self, spec: NodeSpec, out: &mut Materialized) -> NodeKey {
        let NodeSpec {
            id,
            locator,
            label,
            icon,
            color,
            expanded,
            has_more,
            children,
            position,
        } = spec;
        let key = self.nodes.insert(TreeNode {
            locator: locator.unwrap_or_else(|| id.to_string()),
            label: label.unwrap_or_else(|| id.to_string()),
            icon_ref: icon,
            color_ref: color,
            position: position.unwrap_or_default(),
            children: Vec::new(),
            expanded,
            has_more,
            id: id.clone(),
        });
        self.index.insert(id.clone(), key);
        if position.is_some() {
            out.positioned.push(id.clone());
        }
        out.created.push(id);
        let children = children.into_iter().map(|c| self.build(c, out)).collect();
        self.nodes[key].children = children;
        key
    }

    fn destroy(&mut self, key: NodeKey, out: &mut Materialized) {
        let mut stack = vec![key];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.remove(key) {
                self.index.remove(&node.id);
                stack.extend(node.children);
                out.destroyed.push(node.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ids<'a>(visible: &[VisibleNode<'a>]) -> Vec<&'a str> {
        visible.iter().map(|v| v.id().as_str()).collect()
    }

    fn sample() -> TreeModel {
        let (tree, _) = TreeModel::from_specs(vec![
            NodeSpec::new("R").expanded().with_children(vec![
                NodeSpec::new("A").expanded().with_children(vec![NodeSpec::new("C")]),
                NodeSpec::new("B").with_children(vec![NodeSpec::new("E")]),
            ]),
            NodeSpec::new("D"),
        ])
        .unwrap();
        tree
    }

    #[test]
    fn visible_forest_is_preorder_and_respects_expanded() {
        let tree = sample();
        let visible = tree.visible();
        assert_eq!(ids(&visible), vec!["R", "A", "C", "B", "D"]);
        let depths: Vec<_> = visible.iter().map(|v| v.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 1, 0]);
        assert_eq!(visible[2].parent.map(NodeId::as_str), Some("A"));
        assert_eq!(visible[4].parent, None);
    }

    #[test]
    fn derived_edges_follow_visible_nodes_only() {
        let tree = sample();
        let edges: Vec<_> = tree
            .visible_edges()
            .into_iter()
            .map(|e| (e.parent.to_string(), e.child.to_string()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("R".to_string(), "A".to_string()),
                ("A".to_string(), "C".to_string()),
                ("R".to_string(), "B".to_string()),
            ]
        );
    }

    #[test]
    fn collapsing_hides_but_keeps_children() {
        let mut tree = sample();
        assert!(tree.set_expanded(&"A".into(), false).unwrap());
        assert!(!tree.set_expanded(&"A".into(), false).unwrap());
        assert_eq!(ids(&tree.visible()), vec!["R", "A", "B", "D"]);
        assert!(tree.contains(&"C".into()));
        assert_eq!(tree.get(&"A".into()).unwrap().child_count(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = TreeModel::from_specs(vec![
            NodeSpec::new("R").with_children(vec![NodeSpec::new("X")]),
            NodeSpec::new("X"),
        ])
        .unwrap_err();
        assert_eq!(err, EngineError::DuplicateNode("X".into()));

        let mut tree = sample();
        let err = tree.insert_root(NodeSpec::new("C")).unwrap_err();
        assert_eq!(err, EngineError::DuplicateNode("C".into()));
    }

    #[test]
    fn remove_root_destroys_subtree() {
        let mut tree = sample();
        let out = tree.remove_root(&"R".into()).unwrap();
        let mut destroyed: Vec<_> = out.destroyed.iter().map(NodeId::as_str).collect();
        destroyed.sort();
        assert_eq!(destroyed, vec!["A", "B", "C", "E", "R"]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.remove_root(&"D".into()).unwrap().destroyed.len(), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_root_rejects_inner_nodes() {
        let mut tree = sample();
        assert_eq!(
            tree.remove_root(&"A".into()).unwrap_err(),
            EngineError::NotARoot("A".into())
        );
        assert_eq!(
            tree.remove_root(&"nope".into()).unwrap_err(),
            EngineError::UnknownNode("nope".into())
        );
    }

    #[test]
    fn replace_children_keeps_known_children() {
        let mut tree = sample();
        tree.set_position(&"C".into(), Point::new(5.0, 5.0)).unwrap();
        let out = tree
            .replace_children(
                &"A".into(),
                vec![NodeSpec::new("N").at(Point::new(1.0, 2.0)), NodeSpec::new("C")],
            )
            .unwrap();
        assert_eq!(out.created, vec![NodeId::from("N")]);
        assert_eq!(out.positioned, vec![NodeId::from("N")]);
        assert!(out.destroyed.is_empty());
        let children: Vec<_> = tree.children(&"A".into()).map(NodeId::as_str).collect();
        assert_eq!(children, vec!["N", "C"]);
        assert_eq!(tree.position(&"C".into()), Some(Point::new(5.0, 5.0)));

        let out = tree.replace_children(&"A".into(), vec![NodeSpec::new("C")]).unwrap();
        assert_eq!(out.destroyed, vec![NodeId::from("N")]);
        assert!(!tree.contains(&"N".into()));
    }

    #[test]
    fn attributes_do_not_touch_structure() {
        let mut tree = sample();
        tree.set_attribute(&"B".into(), Attribute::Color(Some("red".into()))).unwrap();
        tree.set_attribute(&"B".into(), Attribute::Label("Bee".into())).unwrap();
        let b = tree.get(&"B".into()).unwrap();
        assert_eq!(b.color_ref(), Some("red"));
        assert_eq!(b.label(), "Bee");
        assert_eq!(b.locator(), "B");
    }

    #[test]
    fn preorder_includes_hidden_nodes() {
        let tree = sample();
        let all: Vec<_> = tree.preorder().into_iter().map(|n| n.id().as_str()).collect();
        assert_eq!(all, vec!["R", "A", "C", "B", "E", "D"]);
    }

    #[test]
    fn draw_tree_lists_visible_nodes() {
        let tree = sample();
        let drawn = tree.draw_tree();
        assert!(drawn.contains("[C]"));
        assert!(!drawn.contains("[E]"));
    }
}
