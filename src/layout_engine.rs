pub mod engine;
mod error;
pub(crate) mod graph;
pub mod layered;
pub mod reconciler;
pub mod stacking;

pub use engine::{EngineEvent, EventResponse, LayoutEngine};
pub use error::EngineError;
pub use graph::{Direction, Orientation, ParseDirectionError};
pub use reconciler::PassKind;
