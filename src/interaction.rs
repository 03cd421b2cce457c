pub mod drag;
pub mod viewport;

pub use drag::{DragCommit, DragController, DragTick, InteractionState};
pub use viewport::{Viewport, ViewportDebouncer};
