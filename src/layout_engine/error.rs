use thiserror::Error;

use crate::model::tree::NodeId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Node not found: {0}")]
    UnknownNode(NodeId),
    #[error("Node id already present in the forest: {0}")]
    DuplicateNode(NodeId),
    #[error("Node is not visible: {0}")]
    NotVisible(NodeId),
    #[error("Node is not a root: {0}")]
    NotARoot(NodeId),
    #[error("A drag is already in progress")]
    DragInProgress,
    #[error("No drag is in progress")]
    NoActiveDrag,
    #[error("Node is not part of the active drag: {0}")]
    NodeNotDragged(NodeId),
}
