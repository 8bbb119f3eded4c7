use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum GraphError {
    #[error("node name \"{0}\" already exists")]
    DuplicateName(String),
    #[error("node #{0} not found")]
    NodeNotFound(usize),
    #[error("graph #{0} not found")]
    GraphNotFound(usize),
    #[error("node \"{node}\" has no {dir} anchor {idx}")]
    AnchorOutOfRange {
        node: String,
        dir: &'static str,
        idx: usize,
    },
    #[error("input {idx} of node \"{node}\" is already linked")]
    InputOccupied { node: String, idx: usize },
    #[error("no edge from \"{src}\" to \"{dst}\"")]
    EdgeNotFound { src: String, dst: String },
    #[error("graph \"{0}\" has a cycle")]
    Cyclic(String),
}
