use crate::{InputRwType, OutputRwType};
use graph::GraphError;
use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum RwError {
    #[error(
        "wrong graph: output {out_idx} of \"{node}\" is {output}, but input {in_idx} of \"{peer}\" is {input}"
    )]
    WrongGraph {
        node: String,
        out_idx: usize,
        peer: String,
        in_idx: usize,
        output: OutputRwType,
        input: InputRwType,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("memory rw conflict not resolved in {0} rounds")]
    NotConverged(usize),
}
