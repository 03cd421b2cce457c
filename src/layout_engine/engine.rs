use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use super::reconciler::{PassKind, PassOutcome, Placements, Reconciler};
use super::EngineError;
use crate::common::config::Config;
use crate::interaction::{DragController, InteractionState, Viewport, ViewportDebouncer};
use crate::model::geometry::Point;
use crate::model::saved_layout::{SavedLayout, SavedNode};
use crate::model::signature::{LayoutSnapshot, Signature};
use crate::model::tree::{Attribute, Materialized, NodeId, NodeSpec, TreeModel};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    /// A node got a new position from a pass or a drag commit.
    PositionCommitted { node: NodeId, position: Point },
    LayoutPassCompleted { visible: Vec<NodeId>, kind: PassKind },
    /// `None` asks for the whole forest.
    ViewportFitRequested(Option<Vec<NodeId>>),
    ViewportCommitted(Viewport),
}

#[must_use]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventResponse {
    pub events: Vec<EngineEvent>,
}

impl EventResponse {
    pub fn is_empty(&self) -> bool { self.events.is_empty() }

    pub fn extend(&mut self, other: EventResponse) { self.events.extend(other.events); }

    /// Kind of the reconciliation pass this response carries, if any.
    pub fn pass_kind(&self) -> Option<PassKind> {
        self.events.iter().find_map(|e| match e {
            EngineEvent::LayoutPassCompleted { kind, .. } => Some(*kind),
            _ => None,
        })
    }

    pub fn committed(&self) -> impl Iterator<Item = (&NodeId, Point)> + '_ {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::PositionCommitted { node, position } => Some((node, *position)),
            _ => None,
        })
    }

    fn push(&mut self, event: EngineEvent) { self.events.push(event); }
}

/// Owns the forest and everything needed to keep its layout stable.
///
/// All mutation goes through this type. Structural edits made through
/// [`LayoutEngine::tree_mut`] must be followed by
/// [`LayoutEngine::notify_changed`].
#[derive(Debug)]
pub struct LayoutEngine {
    config: Config,
    tree: TreeModel,
    snapshot: Option<LayoutSnapshot>,
    placements: Placements,
    reconciler: Reconciler,
    drag: DragController,
    viewport: ViewportDebouncer,
    selection: Vec<NodeId>,
    pending_reconcile: bool,
}

impl LayoutEngine {
    pub fn new(config: &Config) -> Self {
        LayoutEngine {
            config: config.clone(),
            tree: TreeModel::new(),
            snapshot: None,
            placements: Placements::default(),
            reconciler: Reconciler::new(config),
            drag: DragController::new(&config.interaction),
            viewport: ViewportDebouncer::new(config.interaction.viewport_debounce()),
            selection: Vec::new(),
            pending_reconcile: false,
        }
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn tree(&self) -> &TreeModel { &self.tree }

    pub fn tree_mut(&mut self) -> &mut TreeModel { &mut self.tree }

    pub fn interaction_state(&self) -> InteractionState { self.drag.state() }

    pub fn has_deferred_reconcile(&self) -> bool { self.pending_reconcile }

    pub fn is_manual(&self, id: &NodeId) -> bool { self.placements.is_manual(id) }

    pub fn manual_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.placements.manual().cloned().collect();
        ids.sort();
        ids
    }

    pub fn selection(&self) -> &[NodeId] { &self.selection }

    pub fn viewport(&self) -> Viewport { self.viewport.committed() }

    pub fn debug_tree(&self) { debug!("Tree:\n{}", self.tree.draw_tree().trim()); }

    /// Replaces the whole forest and lays it out from scratch.
    pub fn load_forest(&mut self, specs: Vec<NodeSpec>) -> Result<EventResponse, EngineError> {
        self.replace_forest(specs)?;
        Ok(self.request_reconcile())
    }

    /// Replaces the whole forest and restores `saved` onto it before the
    /// first pass runs.
    pub fn load_forest_with_layout(
        &mut self,
        specs: Vec<NodeSpec>,
        saved: &SavedLayout,
    ) -> Result<EventResponse, EngineError> {
        self.replace_forest(specs)?;
        Ok(self.restore_layout(saved))
    }

    /// Asks for a reconciliation pass after the tree was changed directly.
    pub fn notify_changed(&mut self) -> EventResponse { self.request_reconcile() }

    pub fn toggle_expanded(&mut self, id: &NodeId) -> Result<EventResponse, EngineError> {
        let expanded = self.tree.get(id).ok_or_else(|| EngineError::UnknownNode(id.clone()))?.expanded();
        _ = self.tree.set_expanded(id, !expanded)?;
        debug!(node = %id, expanded = !expanded, "toggled");
        Ok(self.request_reconcile())
    }

    pub fn set_attribute(&mut self, id: &NodeId, attribute: Attribute) -> Result<EventResponse, EngineError> {
        self.tree.set_attribute(id, attribute)?;
        Ok(self.request_reconcile())
    }

    pub fn add_root(&mut self, spec: NodeSpec) -> Result<EventResponse, EngineError> {
        let materialized = self.tree.insert_root(spec)?;
        self.absorb(&materialized);
        Ok(self.request_reconcile())
    }

    pub fn remove_root(&mut self, id: &NodeId) -> Result<EventResponse, EngineError> {
        let materialized = self.tree.remove_root(id)?;
        self.absorb(&materialized);
        Ok(self.request_reconcile())
    }

    /// Replaces the children of `id` once the provider fetched them.
    pub fn materialize_children(
        &mut self,
        id: &NodeId,
        children: Vec<NodeSpec>,
    ) -> Result<EventResponse, EngineError> {
        let materialized = self.tree.replace_children(id, children)?;
        self.tree.set_has_more(id, false)?;
        self.absorb(&materialized);
        Ok(self.request_reconcile())
    }

    pub fn set_selection(&mut self, ids: impl IntoIterator<Item = NodeId>) -> Result<(), EngineError> {
        let mut selection = Vec::new();
        for id in ids {
            if !self.tree.contains(&id) {
                return Err(EngineError::UnknownNode(id));
            }
            if !selection.contains(&id) {
                selection.push(id);
            }
        }
        self.selection = selection;
        Ok(())
    }

    /// Starts dragging `id`. When `id` is selected, every selected visible
    /// node moves with it.
    pub fn begin_drag(&mut self, id: &NodeId) -> Result<(), EngineError> {
        let position = self.tree.position(id).ok_or_else(|| EngineError::UnknownNode(id.clone()))?;
        let visible = self.tree.visible();
        if !visible.iter().any(|v| v.id() == id) {
            return Err(EngineError::NotVisible(id.clone()));
        }
        let mut origins = vec![(id.clone(), position)];
        if self.selection.contains(id) {
            origins.extend(
                visible
                    .iter()
                    .filter(|v| v.id() != id && self.selection.contains(v.id()))
                    .map(|v| (v.id().clone(), v.node.position())),
            );
        }
        self.drag.begin(id.clone(), origins)
    }

    pub fn update_drag(&mut self, id: &NodeId, position: Point) -> Result<(), EngineError> {
        self.drag.update(id, position)
    }

    /// Ends the drag. Positions are committed on the next [`tick`](Self::tick).
    pub fn end_drag(&mut self) -> Result<(), EngineError> { self.drag.end() }

    /// Where `id` should be drawn, taking an active drag into account.
    pub fn display_position(&self, id: &NodeId) -> Option<Point> {
        self.drag.display_position(id).or_else(|| self.tree.position(id))
    }

    /// Drives everything that waits on time: the drag commit, the settle
    /// delay and the viewport debounce.
    pub fn tick(&mut self, now: Instant) -> EventResponse {
        let mut response = EventResponse::default();
        let step = self.drag.tick(now);
        if let Some(commit) = step.commit {
            for (id, position) in commit.moved {
                // The node may have been removed while it was being dragged.
                if self.tree.set_position(&id, position).is_err() {
                    debug!(node = %id, "dragged node is gone, dropping commit");
                    continue;
                }
                debug!(node = %id, ?position, "drag committed");
                self.placements.mark_manual(id.clone());
                response.push(EngineEvent::PositionCommitted { node: id, position });
            }
        }
        if step.settled && self.pending_reconcile {
            debug!("running deferred reconciliation");
            response.extend(self.request_reconcile());
        }
        if let Some(viewport) = self.viewport.poll(now) {
            response.push(EngineEvent::ViewportCommitted(viewport));
        }
        response
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.drag.next_deadline(), self.viewport.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn update_viewport(&mut self, viewport: Viewport, now: Instant) {
        self.viewport.update(viewport, now);
    }

    /// Asks the renderer to frame `ids`, or the whole forest for `None`.
    pub fn request_fit(&self, ids: Option<Vec<NodeId>>) -> EventResponse {
        EventResponse {
            events: vec![EngineEvent::ViewportFitRequested(ids)],
        }
    }

    /// Captures every positioned node and the current shape.
    pub fn save_layout(&self, name: &str) -> SavedLayout {
        let nodes = self
            .tree
            .preorder()
            .into_iter()
            .filter(|n| self.placements.is_placed(n.id()))
            .map(|n| SavedNode {
                id: n.id().clone(),
                locator: n.locator().to_string(),
                position: n.position(),
                manual: self.placements.is_manual(n.id()),
            })
            .collect();
        let saved_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        SavedLayout::new(name, saved_at_ms, nodes, Signature::of(&self.tree))
    }

    /// Seeds positions, manual flags and the snapshot from `saved`, then
    /// reconciles. An unchanged shape makes that pass a no-op.
    pub fn restore_layout(&mut self, saved: &SavedLayout) -> EventResponse {
        let matcher = saved.matcher();
        let mut seeded = Vec::new();
        for node in self.tree.preorder() {
            if let Some(entry) = matcher.find(node.locator(), node.id()) {
                seeded.push((node.id().clone(), entry.position, entry.manual));
            }
        }
        info!(
            name = %saved.name,
            matched = seeded.len(),
            saved = saved.nodes.len(),
            manual = saved.manual_count(),
            "restoring layout"
        );

        self.placements.clear();
        let mut restored = Vec::with_capacity(seeded.len());
        for (id, position, manual) in seeded {
            // Ids come from the preorder walk above.
            if self.tree.set_position(&id, position).is_err() {
                continue;
            }
            if manual {
                self.placements.mark_manual(id.clone());
            } else {
                self.placements.mark_placed(id.clone());
            }
            restored.push((id, position));
        }
        self.snapshot = Some(LayoutSnapshot::seeded(saved.shape.clone(), restored));
        self.request_reconcile()
    }

    fn replace_forest(&mut self, specs: Vec<NodeSpec>) -> Result<(), EngineError> {
        let (tree, materialized) = TreeModel::from_specs(specs)?;
        info!(nodes = tree.len(), "loaded forest");
        self.tree = tree;
        self.snapshot = None;
        self.placements.clear();
        self.selection.clear();
        self.drag = DragController::new(&self.config.interaction);
        self.pending_reconcile = false;
        self.absorb(&materialized);
        Ok(())
    }

    fn absorb(&mut self, materialized: &Materialized) {
        for id in &materialized.positioned {
            self.placements.mark_placed(id.clone());
        }
        if !materialized.destroyed.is_empty() {
            self.placements.forget(&materialized.destroyed);
            self.selection.retain(|id| !materialized.destroyed.contains(id));
        }
        trace!(
            created = materialized.created.len(),
            destroyed = materialized.destroyed.len(),
            "materialized"
        );
    }

    fn request_reconcile(&mut self) -> EventResponse {
        if !self.drag.is_idle() {
            debug!(state = %self.drag.state(), "interaction in progress, deferring reconciliation");
            self.pending_reconcile = true;
            return EventResponse::default();
        }
        self.pending_reconcile = false;
        self.reconcile()
    }

    #[instrument(level = "debug", skip(self))]
    fn reconcile(&mut self) -> EventResponse {
        let PassOutcome { kind, visible, moved } =
            self.reconciler.reconcile(&mut self.tree, self.snapshot.as_ref(), &mut self.placements);
        if kind != PassKind::NoOp {
            self.snapshot = Some(LayoutSnapshot::capture(&self.tree));
            self.debug_tree();
        }

        let mut response = EventResponse::default();
        for (node, position) in moved {
            response.push(EngineEvent::PositionCommitted { node, position });
        }
        let fit = kind == PassKind::Initial && !visible.is_empty();
        response.push(EngineEvent::LayoutPassCompleted { visible, kind });
        if fit {
            response.push(EngineEvent::ViewportFitRequested(None));
        }
        response
    }
}
