//! Coalescing of pan/zoom updates before they are committed.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Point,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            center: Point::ORIGIN,
            zoom: 1.0,
        }
    }
}

/// Holds the latest viewport and commits it at most once per window.
///
/// The window opens with the first update after a commit, so continuous
/// panning still commits regularly instead of waiting for the pointer to
/// stop.
#[derive(Debug, Clone)]
pub struct ViewportDebouncer {
    window: Duration,
    committed: Viewport,
    pending: Option<(Viewport, Instant)>,
}

impl ViewportDebouncer {
    pub fn new(window: Duration) -> Self {
        ViewportDebouncer {
            window,
            committed: Viewport::default(),
            pending: None,
        }
    }

    pub fn committed(&self) -> Viewport { self.committed }

    pub fn pending(&self) -> Option<Viewport> { self.pending.map(|(v, _)| v) }

    pub fn update(&mut self, viewport: Viewport, now: Instant) {
        let opened = self.pending.map_or(now, |(_, opened)| opened);
        trace!(?viewport, "viewport update");
        self.pending = Some((viewport, opened));
    }

    /// Commits the pending viewport once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Viewport> {
        let (viewport, opened) = self.pending?;
        if now.saturating_duration_since(opened) < self.window {
            return None;
        }
        self.pending = None;
        if viewport == self.committed {
            return None;
        }
        self.committed = viewport;
        Some(viewport)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, opened)| opened + self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64) -> Viewport {
        Viewport {
            center: Point::new(x, 0.0),
            zoom: 1.0,
        }
    }

    #[test]
    fn updates_within_window_coalesce() {
        let start = Instant::now();
        let mut debouncer = ViewportDebouncer::new(Duration::from_millis(100));
        for i in 0..5 {
            debouncer.update(at(i as f64), start + Duration::from_millis(i * 10));
        }
        assert_eq!(debouncer.poll(start + Duration::from_millis(60)), None);
        assert_eq!(debouncer.pending(), Some(at(4.0)));
        assert_eq!(debouncer.poll(start + Duration::from_millis(100)), Some(at(4.0)));
        assert_eq!(debouncer.committed(), at(4.0));
        assert_eq!(debouncer.poll(start + Duration::from_millis(300)), None);
    }

    #[test]
    fn continuous_movement_still_commits() {
        let start = Instant::now();
        let mut debouncer = ViewportDebouncer::new(Duration::from_millis(100));
        let mut commits = 0;
        for i in 0..30u64 {
            let now = start + Duration::from_millis(i * 16);
            debouncer.update(at(i as f64), now);
            if debouncer.poll(now).is_some() {
                commits += 1;
            }
        }
        // 30 updates over ~460ms with a 100ms window.
        assert!((3..=5).contains(&commits), "{commits}");
    }

    #[test]
    fn unchanged_viewport_is_not_recommitted() {
        let start = Instant::now();
        let mut debouncer = ViewportDebouncer::new(Duration::from_millis(100));
        debouncer.update(Viewport::default(), start);
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(debouncer.poll(start + Duration::from_millis(150)), None);
        assert_eq!(debouncer.pending(), None);
    }
}
