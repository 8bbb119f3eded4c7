//! 数据 dump。
//!
//! 把调度的任务编码为设备侧的 dump 描述，设备在任务完成时按描述导出张量；
//! 任务异常时从主机侧导出算子现场。

mod dump_ref;
mod dumper;
mod encode;
mod error;
mod exception;
mod properties;

pub mod proto;

pub use dumper::{DataDumper, MEMORY_L1};
pub use encode::decode_shape;
pub use error::DumpError;
pub use exception::{OpDescInfo, TensorInfo};
pub use properties::{ALL_MODEL_NEED_DUMP, DumpMode, DumpProperties};
