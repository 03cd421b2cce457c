//! Recognizes layouts where nodes are piled on top of each other.
//!
//! Positions are quantized into square grid cells. When the number of
//! occupied cells falls below a fraction of the node count the layout is
//! considered stacked, which typically means freshly materialized nodes
//! never got a position or a persisted layout was corrupted. A false
//! positive only costs an extra relayout.

use crate::common::collections::HashMap;
use crate::common::config::StackingSettings;
use crate::model::geometry::Point;
use crate::model::tree::NodeId;

type Cell = (i64, i64);

#[derive(Debug, Clone)]
pub struct StackingDetector {
    cell_size: f64,
    min_distinct_ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StackingReport {
    pub node_count: usize,
    pub distinct_cells: usize,
    pub stacked: bool,
    cells: HashMap<Cell, Vec<NodeId>>,
}

impl StackingReport {
    /// Groups of nodes sharing a cell, in no particular order.
    pub fn crowded(&self) -> impl Iterator<Item = &[NodeId]> + '_ {
        self.cells.values().filter(|ids| ids.len() > 1).map(Vec::as_slice)
    }
}

impl Default for StackingDetector {
    fn default() -> Self { Self::new(&StackingSettings::default()) }
}

impl StackingDetector {
    pub fn new(settings: &StackingSettings) -> Self {
        StackingDetector {
            cell_size: settings.cell_size,
            min_distinct_ratio: settings.min_distinct_ratio,
        }
    }

    pub fn inspect<'a>(&self, positions: impl IntoIterator<Item = (&'a NodeId, Point)>) -> StackingReport {
        let mut cells: HashMap<Cell, Vec<NodeId>> = HashMap::default();
        let mut node_count = 0;
        for (id, pos) in positions {
            node_count += 1;
            cells.entry(self.cell(pos)).or_default().push(id.clone());
        }
        let distinct_cells = cells.len();
        let stacked =
            node_count > 0 && (distinct_cells as f64) < node_count as f64 * self.min_distinct_ratio;
        StackingReport {
            node_count,
            distinct_cells,
            stacked,
            cells,
        }
    }

    fn cell(&self, pos: Point) -> Cell {
        let size = self.cell_size.max(f64::EPSILON);
        ((pos.x / size).floor() as i64, (pos.y / size).floor() as i64)
    }
}
