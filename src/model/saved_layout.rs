//! Named layout snapshots persisted with `ron`.
//!
//! A saved layout records a position for every node that had one, whether
//! a user put it there, and the visible shape at save time. Restoring it
//! before the first pass lets the reconciler see an already placed forest.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::collections::{BTreeMap, HashMap};
use crate::model::geometry::Point;
use crate::model::signature::Signature;
use crate::model::tree::NodeId;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SavedNode {
    pub id: NodeId,
    pub locator: String,
    pub position: Point,
    /// Placed by a user drag rather than computed.
    #[serde(default)]
    pub manual: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SavedLayout {
    pub name: String,
    pub saved_at_ms: u64,
    pub nodes: Vec<SavedNode>,
    pub shape: Signature,
}

impl SavedLayout {
    pub fn new(name: impl Into<String>, saved_at_ms: u64, nodes: Vec<SavedNode>, shape: Signature) -> Self {
        SavedLayout {
            name: name.into(),
            saved_at_ms,
            nodes,
            shape,
        }
    }

    pub fn manual_count(&self) -> usize { self.nodes.iter().filter(|n| n.manual).count() }

    /// Matches saved entries to live nodes by locator first and id second.
    pub fn matcher(&self) -> SavedLayoutMatcher<'_> {
        let mut by_locator = HashMap::default();
        let mut by_id = HashMap::default();
        for node in &self.nodes {
            by_locator.entry(node.locator.as_str()).or_insert(node);
            by_id.entry(&node.id).or_insert(node);
        }
        SavedLayoutMatcher { by_locator, by_id }
    }
}

pub struct SavedLayoutMatcher<'a> {
    by_locator: HashMap<&'a str, &'a SavedNode>,
    by_id: HashMap<&'a NodeId, &'a SavedNode>,
}

impl<'a> SavedLayoutMatcher<'a> {
    pub fn find(&self, locator: &str, id: &NodeId) -> Option<&'a SavedNode> {
        self.by_locator.get(locator).or_else(|| self.by_id.get(id)).copied()
    }
}

/// All saved layouts, keyed by name, stored in one file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct SavedLayoutStore {
    layouts: BTreeMap<String, SavedLayout>,
}

impl SavedLayoutStore {
    /// Loads the store at `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        Ok(ron::from_str(&buf)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let buf = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        File::create(path)?.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Stores `layout` under its name, returning the layout it replaced.
    pub fn insert(&mut self, layout: SavedLayout) -> Option<SavedLayout> {
        self.layouts.insert(layout.name.clone(), layout)
    }

    pub fn get(&self, name: &str) -> Option<&SavedLayout> { self.layouts.get(name) }

    pub fn remove(&mut self, name: &str) -> Option<SavedLayout> { self.layouts.remove(name) }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ { self.layouts.keys().map(String::as_str) }

    pub fn len(&self) -> usize { self.layouts.len() }

    pub fn is_empty(&self) -> bool { self.layouts.is_empty() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::tree::{NodeSpec, TreeModel};

    fn layout(name: &str) -> SavedLayout {
        let (tree, _) = TreeModel::from_specs(vec![
            NodeSpec::new("r").expanded().with_children(vec![NodeSpec::new("a")]),
        ])
        .unwrap();
        SavedLayout::new(
            name,
            1_700_000_000_000,
            vec![
                SavedNode {
                    id: "r".into(),
                    locator: "/r".into(),
                    position: Point::new(0.0, 0.0),
                    manual: false,
                },
                SavedNode {
                    id: "a".into(),
                    locator: "/r/a".into(),
                    position: Point::new(12.5, 60.0),
                    manual: true,
                },
            ],
            Signature::of(&tree),
        )
    }

    #[test]
    fn store_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layouts").join("saved.ron");
        let mut store = SavedLayoutStore::default();
        assert_eq!(store.insert(layout("work")), None);
        assert!(store.insert(layout("home")).is_none());
        store.save(&path).unwrap();

        let loaded = SavedLayoutStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["home", "work"]);
        assert_eq!(loaded.get("work").map(SavedLayout::manual_count), Some(1));
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedLayoutStore::load(&dir.path().join("nope.ron")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ron");
        std::fs::write(&path, "{ not ron").unwrap();
        assert!(SavedLayoutStore::load(&path).is_err());
    }

    #[test]
    fn insert_replaces_by_name() {
        let mut store = SavedLayoutStore::default();
        _ = store.insert(layout("work"));
        let mut newer = layout("work");
        newer.saved_at_ms += 1;
        let old = store.insert(newer.clone()).unwrap();
        assert_eq!(old.saved_at_ms + 1, newer.saved_at_ms);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("work"), Some(newer));
    }

    #[test]
    fn matcher_prefers_locator_over_id() {
        let saved = layout("work");
        let matcher = saved.matcher();
        // Same locator under a regenerated id.
        let hit = matcher.find("/r/a", &"a-regenerated".into()).unwrap();
        assert_eq!(hit.position, Point::new(12.5, 60.0));
        // Unknown locator falls back to the id.
        let hit = matcher.find("/moved/r", &"r".into()).unwrap();
        assert_eq!(hit.locator, "/r");
        assert!(matcher.find("/x", &"x".into()).is_none());
    }
}
