use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::common::config::InteractionSettings;
use crate::layout_engine::EngineError;
use crate::model::geometry::Point;
use crate::model::tree::NodeId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum InteractionState {
    #[default]
    Idle,
    Dragging,
    Settling,
}

/// Positions to write back once a drag has ended.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DragCommit {
    pub moved: Vec<(NodeId, Point)>,
}

/// What a tick of the controller produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DragTick {
    pub commit: Option<DragCommit>,
    /// The settle delay ran out and the controller is back to idle.
    pub settled: bool,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    primary: NodeId,
    /// Last committed position of every node that moves with the drag.
    origins: Vec<(NodeId, Point)>,
    delta: (f64, f64),
}

impl ActiveDrag {
    fn origin(&self, id: &NodeId) -> Option<Point> {
        self.origins.iter().find(|(n, _)| n == id).map(|(_, p)| *p)
    }

    fn current(&self, origin: Point) -> Point { origin.offset(self.delta.0, self.delta.1) }
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Idle,
    Dragging(ActiveDrag),
    Settling {
        pending: Option<DragCommit>,
        until: Option<Instant>,
    },
}

#[derive(Debug, Clone)]
pub struct DragController {
    phase: Phase,
    epsilon: f64,
    settle_delay: Duration,
}

impl Default for DragController {
    fn default() -> Self { Self::new(&InteractionSettings::default()) }
}

impl DragController {
    pub fn new(settings: &InteractionSettings) -> Self {
        DragController {
            phase: Phase::Idle,
            epsilon: settings.drag_epsilon,
            settle_delay: settings.settle_delay(),
        }
    }

    pub fn state(&self) -> InteractionState {
        match self.phase {
            Phase::Idle => InteractionState::Idle,
            Phase::Dragging(_) => InteractionState::Dragging,
            Phase::Settling { .. } => InteractionState::Settling,
        }
    }

    pub fn is_idle(&self) -> bool { matches!(self.phase, Phase::Idle) }

    /// Starts dragging `primary` together with `origins`, which must hold
    /// the committed position of every node that moves, `primary` included.
    ///
    /// A new drag may start while settling once the previous commit has
    /// been handed out.
    pub fn begin(&mut self, primary: NodeId, origins: Vec<(NodeId, Point)>) -> Result<(), EngineError> {
        match &self.phase {
            Phase::Idle | Phase::Settling { pending: None, .. } => {}
            _ => return Err(EngineError::DragInProgress),
        }
        if !origins.iter().any(|(id, _)| *id == primary) {
            return Err(EngineError::NodeNotDragged(primary));
        }
        debug!(node = %primary, members = origins.len(), "drag started");
        self.phase = Phase::Dragging(ActiveDrag {
            primary,
            origins,
            delta: (0.0, 0.0),
        });
        Ok(())
    }

    /// Moves the drag so that `id` sits at `pos`. Nothing is committed.
    pub fn update(&mut self, id: &NodeId, pos: Point) -> Result<(), EngineError> {
        let Phase::Dragging(drag) = &mut self.phase else {
            return Err(EngineError::NoActiveDrag);
        };
        let origin = drag.origin(id).ok_or_else(|| EngineError::NodeNotDragged(id.clone()))?;
        drag.delta = (pos.x - origin.x, pos.y - origin.y);
        trace!(node = %id, ?pos, "drag update");
        Ok(())
    }

    /// Ends the drag. The commit is held until the next [`tick`](Self::tick).
    pub fn end(&mut self) -> Result<(), EngineError> {
        let drag = match std::mem::take(&mut self.phase) {
            Phase::Dragging(drag) => drag,
            other => {
                self.phase = other;
                return Err(EngineError::NoActiveDrag);
            }
        };
        let moved: Vec<(NodeId, Point)> = drag
            .origins
            .iter()
            .filter_map(|(id, origin)| {
                let end = drag.current(*origin);
                (end.distance_to(*origin) > self.epsilon).then(|| (id.clone(), end))
            })
            .collect();
        debug!(node = %drag.primary, moved = moved.len(), "drag ended");
        self.phase = Phase::Settling {
            pending: Some(DragCommit { moved }),
            until: None,
        };
        Ok(())
    }

    pub fn tick(&mut self, now: Instant) -> DragTick {
        let Phase::Settling { pending, until } = &mut self.phase else {
            return DragTick::default();
        };
        if let Some(commit) = pending.take() {
            *until = Some(now + self.settle_delay);
            return DragTick {
                commit: Some(commit),
                settled: false,
            };
        }
        if until.is_some_and(|until| now >= until) {
            debug!("drag settled");
            self.phase = Phase::Idle;
            return DragTick {
                commit: None,
                settled: true,
            };
        }
        DragTick::default()
    }

    /// Where `id` should be drawn right now, if the active drag moves it.
    pub fn display_position(&self, id: &NodeId) -> Option<Point> {
        match &self.phase {
            Phase::Dragging(drag) => drag.origin(id).map(|origin| drag.current(origin)),
            _ => None,
        }
    }

    /// The instant the controller is next due to change on its own.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Settling { until, .. } => until,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn id(s: &str) -> NodeId { NodeId::from(s) }

    fn controller() -> DragController { DragController::default() }

    #[test]
    fn drag_moves_all_members_by_the_same_delta() {
        let mut drag = controller();
        drag.begin(id("a"), vec![(id("a"), Point::new(0.0, 0.0)), (id("b"), Point::new(100.0, 50.0))])
            .unwrap();
        assert_eq!(drag.state(), InteractionState::Dragging);
        drag.update(&id("a"), Point::new(10.0, 20.0)).unwrap();
        assert_eq!(drag.display_position(&id("b")), Some(Point::new(110.0, 70.0)));

        drag.end().unwrap();
        assert_eq!(drag.state(), InteractionState::Settling);
        let now = Instant::now();
        let tick = drag.tick(now);
        assert_eq!(
            tick.commit,
            Some(DragCommit {
                moved: vec![(id("a"), Point::new(10.0, 20.0)), (id("b"), Point::new(110.0, 70.0))]
            })
        );
        assert!(!tick.settled);
    }

    #[test]
    fn small_drags_commit_nothing() {
        let mut drag = controller();
        drag.begin(id("a"), vec![(id("a"), Point::new(5.0, 5.0))]).unwrap();
        drag.update(&id("a"), Point::new(5.3, 5.3)).unwrap();
        drag.end().unwrap();
        let tick = drag.tick(Instant::now());
        assert_eq!(tick.commit, Some(DragCommit::default()));
    }

    #[test]
    fn drag_back_to_start_commits_nothing() {
        let mut drag = controller();
        drag.begin(id("a"), vec![(id("a"), Point::new(5.0, 5.0))]).unwrap();
        drag.update(&id("a"), Point::new(300.0, 5.0)).unwrap();
        drag.update(&id("a"), Point::new(5.0, 5.0)).unwrap();
        drag.end().unwrap();
        assert_eq!(drag.tick(Instant::now()).commit, Some(DragCommit::default()));
    }

    #[test]
    fn settles_after_delay() {
        let mut drag = controller();
        drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]).unwrap();
        drag.end().unwrap();
        let start = Instant::now();
        _ = drag.tick(start);
        assert_eq!(drag.next_deadline(), Some(start + Duration::from_millis(200)));

        let early = drag.tick(start + Duration::from_millis(199));
        assert!(!early.settled);
        assert_eq!(drag.state(), InteractionState::Settling);

        let late = drag.tick(start + Duration::from_millis(200));
        assert!(late.settled);
        assert!(drag.is_idle());
    }

    #[test]
    fn rejects_out_of_order_calls() {
        let mut drag = controller();
        assert_eq!(drag.end(), Err(EngineError::NoActiveDrag));
        assert_eq!(drag.update(&id("a"), Point::ORIGIN), Err(EngineError::NoActiveDrag));
        assert_eq!(
            drag.begin(id("a"), vec![(id("b"), Point::ORIGIN)]),
            Err(EngineError::NodeNotDragged(id("a")))
        );

        drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]).unwrap();
        assert_eq!(
            drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]),
            Err(EngineError::DragInProgress)
        );
        assert_eq!(
            drag.update(&id("x"), Point::ORIGIN),
            Err(EngineError::NodeNotDragged(id("x")))
        );

        drag.end().unwrap();
        // The commit has not been handed out yet.
        assert_eq!(
            drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]),
            Err(EngineError::DragInProgress)
        );
        _ = drag.tick(Instant::now());
        assert!(drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]).is_ok());
    }

    #[test]
    fn ticks_while_idle_or_dragging_do_nothing() {
        let mut drag = controller();
        assert_eq!(drag.tick(Instant::now()), DragTick::default());
        drag.begin(id("a"), vec![(id("a"), Point::ORIGIN)]).unwrap();
        assert_eq!(drag.tick(Instant::now()), DragTick::default());
        assert_eq!(drag.state(), InteractionState::Dragging);
    }
}
