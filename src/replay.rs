//! Recorded input scripts.
//!
//! A script is a `ron` file with one value per line: the initial forest
//! first, then one [`ScriptStep`] per input. Replaying feeds the steps to a
//! fresh engine on a synthetic clock, so a script always produces the same
//! events.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::common::config::Config;
use crate::interaction::Viewport;
use crate::layout_engine::{EngineEvent, EventResponse, LayoutEngine};
use crate::model::geometry::Point;
use crate::model::tree::{Attribute, NodeId, NodeSpec};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptInput {
    ToggleExpanded(NodeId),
    SetAttribute(NodeId, Attribute),
    AddRoot(NodeSpec),
    RemoveRoot(NodeId),
    MaterializeChildren(NodeId, Vec<NodeSpec>),
    SetSelection(Vec<NodeId>),
    BeginDrag(NodeId),
    UpdateDrag(NodeId, Point),
    EndDrag,
    UpdateViewport(Viewport),
    RequestFit(Option<Vec<NodeId>>),
    NotifyChanged,
    Tick,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScriptStep {
    /// Milliseconds since the start of the recording.
    pub at_ms: u64,
    pub input: ScriptInput,
}

/// Replays the script at `path` and hands every emitted event to `on_event`
/// together with the step time it happened at.
pub fn replay(
    path: &Path,
    config: &Config,
    mut on_event: impl FnMut(u64, &EngineEvent),
) -> anyhow::Result<LayoutEngine> {
    let file = BufReader::new(File::open(path)?);
    let mut lines = file.lines();
    let forest: Vec<NodeSpec> = ron::de::from_str(
        &lines.next().context("empty replay script, expected the initial forest")??,
    )?;

    let start = Instant::now();
    let mut engine = LayoutEngine::new(config);
    let mut emit = |at_ms: u64, response: EventResponse| {
        for event in &response.events {
            on_event(at_ms, event);
        }
    };
    emit(0, engine.load_forest(forest)?);

    let mut last_ms = 0;
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let step: ScriptStep =
            ron::de::from_str(&line).with_context(|| format!("bad step on line {}", n + 2))?;
        let _span = info_span!("step", at_ms = step.at_ms).entered();
        let now = start + Duration::from_millis(step.at_ms);
        last_ms = last_ms.max(step.at_ms);

        // Timers due before this input fire first.
        emit(step.at_ms, engine.tick(now));
        let response = apply(&mut engine, step.input, now)
            .with_context(|| format!("step on line {} failed", n + 2))?;
        emit(step.at_ms, response);
    }

    // Drain whatever is still waiting on time.
    let mut now = start + Duration::from_millis(last_ms);
    emit(last_ms, engine.tick(now));
    for _ in 0..4 {
        let Some(deadline) = engine.next_deadline() else { break };
        now = now.max(deadline);
        let at_ms = now.saturating_duration_since(start).as_millis() as u64;
        emit(at_ms, engine.tick(now));
    }
    debug!(nodes = engine.tree().len(), "replay finished");
    Ok(engine)
}

fn apply(engine: &mut LayoutEngine, input: ScriptInput, now: Instant) -> anyhow::Result<EventResponse> {
    let response = match input {
        ScriptInput::ToggleExpanded(id) => engine.toggle_expanded(&id)?,
        ScriptInput::SetAttribute(id, attribute) => engine.set_attribute(&id, attribute)?,
        ScriptInput::AddRoot(spec) => engine.add_root(spec)?,
        ScriptInput::RemoveRoot(id) => engine.remove_root(&id)?,
        ScriptInput::MaterializeChildren(id, children) => engine.materialize_children(&id, children)?,
        ScriptInput::SetSelection(ids) => {
            engine.set_selection(ids)?;
            EventResponse::default()
        }
        ScriptInput::BeginDrag(id) => {
            engine.begin_drag(&id)?;
            EventResponse::default()
        }
        ScriptInput::UpdateDrag(id, pos) => {
            engine.update_drag(&id, pos)?;
            EventResponse::default()
        }
        ScriptInput::EndDrag => {
            engine.end_drag()?;
            EventResponse::default()
        }
        ScriptInput::UpdateViewport(viewport) => {
            engine.update_viewport(viewport, now);
            EventResponse::default()
        }
        ScriptInput::RequestFit(ids) => engine.request_fit(ids),
        ScriptInput::NotifyChanged => engine.notify_changed(),
        ScriptInput::Tick => engine.tick(now),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::layout_engine::PassKind;

    fn forest() -> Vec<NodeSpec> {
        vec![NodeSpec::new("R").expanded().with_children(vec![
            NodeSpec::new("A").with_children(vec![NodeSpec::new("C")]),
            NodeSpec::new("B"),
        ])]
    }

    fn record(path: &Path, steps: &[(u64, ScriptInput)]) {
        let mut lines = vec![ron::ser::to_string(&forest()).unwrap()];
        for (at_ms, input) in steps {
            let step = ScriptStep {
                at_ms: *at_ms,
                input: input.clone(),
            };
            lines.push(ron::ser::to_string(&step).unwrap());
        }
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn kinds(events: &[(u64, EngineEvent)]) -> Vec<PassKind> {
        events
            .iter()
            .filter_map(|(_, e)| match e {
                EngineEvent::LayoutPassCompleted { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn replays_recorded_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.ron");
        record(
            &path,
            &[
                (10, ScriptInput::ToggleExpanded("A".into())),
                (20, ScriptInput::BeginDrag("B".into())),
                (30, ScriptInput::UpdateDrag("B".into(), Point::new(200.0, 200.0))),
                (40, ScriptInput::EndDrag),
                (45, ScriptInput::AddRoot(NodeSpec::new("D"))),
                (50, ScriptInput::Tick),
                (400, ScriptInput::SetAttribute("D".into(), Attribute::Icon(Some("star".into())))),
            ],
        );

        let mut events = Vec::new();
        let engine =
            replay(&path, &Config::default(), |at, e| events.push((at, e.clone()))).unwrap();

        assert_eq!(
            kinds(&events),
            vec![
                PassKind::Initial,
                PassKind::LocalFanout,
                PassKind::FullRelayout,
                PassKind::NoOp
            ]
        );
        // The drag commits on the first tick after it ended.
        assert!(events.contains(&(
            45,
            EngineEvent::PositionCommitted {
                node: "B".into(),
                position: Point::new(200.0, 200.0)
            }
        )));
        assert!(engine.is_manual(&"B".into()));
        assert_eq!(engine.tree().position(&"B".into()), Some(Point::new(200.0, 200.0)));
        assert_ne!(engine.tree().position(&"D".into()), Some(Point::ORIGIN));
    }

    #[test]
    fn trailing_timers_are_drained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewport.ron");
        let view = Viewport {
            center: Point::new(5.0, 5.0),
            zoom: 2.0,
        };
        record(&path, &[(10, ScriptInput::UpdateViewport(view))]);

        let mut events = Vec::new();
        let engine = replay(&path, &Config::default(), |_, e| events.push(e.clone())).unwrap();
        assert!(events.contains(&EngineEvent::ViewportCommitted(view)));
        assert_eq!(engine.viewport(), view);
    }

    #[test]
    fn failing_step_reports_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ron");
        record(&path, &[(5, ScriptInput::ToggleExpanded("missing".into()))]);
        let err = replay(&path, &Config::default(), |_, _| {}).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
    }

    #[test]
    fn empty_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ron");
        std::fs::write(&path, "").unwrap();
        assert!(replay(&path, &Config::default(), |_, _| {}).is_err());
    }
}
