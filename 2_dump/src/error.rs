use exec::ExecError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("shape or size mismatch: {0}")]
    ShapeOrSizeMismatch(String),
    #[error("failed to alloc {0} bytes on device")]
    OutOfMemory(usize),
    #[error("serialized {0} is empty")]
    Encode(&'static str),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
