use crate::RtError;
use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ExecError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("shape or size mismatch: {0}")]
    ShapeOrSizeMismatch(String),
    #[error("task {task_id} of \"{op}\" on stream {stream_id} failed with code {code:#x}")]
    Device {
        op: String,
        task_id: u32,
        stream_id: u32,
        code: u32,
    },
    #[error(transparent)]
    Rt(#[from] RtError),
    #[error("unsupported op type \"{0}\"")]
    Unsupported(String),
}
