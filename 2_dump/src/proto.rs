//! 设备侧 dump 协议的消息定义。

use prost::{Enumeration, Message};

#[derive(Clone, PartialEq, Message)]
pub struct Shape {
    #[prost(uint64, repeated, tag = "1")]
    pub dim: Vec<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Output {
    #[prost(int32, tag = "1")]
    pub data_type: i32,
    #[prost(int32, tag = "2")]
    pub format: i32,
    #[prost(message, optional, tag = "3")]
    pub shape: Option<Shape>,
    #[prost(uint64, tag = "4")]
    pub address: u64,
    #[prost(string, tag = "5")]
    pub original_name: String,
    #[prost(int32, tag = "6")]
    pub original_output_index: i32,
    #[prost(int32, tag = "7")]
    pub original_output_data_type: i32,
    #[prost(int32, tag = "8")]
    pub original_output_format: i32,
    #[prost(uint64, tag = "9")]
    pub size: u64,
    #[prost(message, optional, tag = "10")]
    pub origin_shape: Option<Shape>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Input {
    #[prost(int32, tag = "1")]
    pub data_type: i32,
    #[prost(int32, tag = "2")]
    pub format: i32,
    #[prost(message, optional, tag = "3")]
    pub shape: Option<Shape>,
    #[prost(uint64, tag = "4")]
    pub address: u64,
    #[prost(uint64, tag = "5")]
    pub size: u64,
    #[prost(message, optional, tag = "6")]
    pub origin_shape: Option<Shape>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Enumeration)]
#[repr(i32)]
pub enum BufferType {
    L1 = 0,
}

#[derive(Clone, PartialEq, Message)]
pub struct OpBuffer {
    #[prost(enumeration = "BufferType", tag = "1")]
    pub buffer_type: i32,
    #[prost(uint64, tag = "2")]
    pub address: u64,
    #[prost(uint64, tag = "3")]
    pub size: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Op {
    #[prost(string, tag = "1")]
    pub op_name: String,
    #[prost(string, tag = "2")]
    pub op_type: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Task {
    #[prost(uint32, tag = "1")]
    pub task_id: u32,
    #[prost(uint32, tag = "2")]
    pub stream_id: u32,
    #[prost(message, optional, tag = "3")]
    pub op: Option<Op>,
    #[prost(message, repeated, tag = "4")]
    pub output: Vec<Output>,
    #[prost(bool, tag = "5")]
    pub end_graph: bool,
    #[prost(message, repeated, tag = "6")]
    pub input: Vec<Input>,
    #[prost(message, repeated, tag = "7")]
    pub buffer: Vec<OpBuffer>,
}

/// 加载与卸载 dump 描述时交给设备的消息，未设置的地址不编码
#[derive(Clone, PartialEq, Message)]
pub struct OpMappingInfo {
    #[prost(string, tag = "1")]
    pub dump_path: String,
    #[prost(string, optional, tag = "2")]
    pub model_name: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub model_id: Option<u32>,
    #[prost(uint64, optional, tag = "4")]
    pub step_id_addr: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub iterations_per_loop_addr: Option<u64>,
    #[prost(uint64, optional, tag = "6")]
    pub loop_cond_addr: Option<u64>,
    #[prost(uint32, tag = "7")]
    pub flag: u32,
    #[prost(message, repeated, tag = "8")]
    pub task: Vec<Task>,
    #[prost(string, tag = "9")]
    pub dump_step: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct OpInput {
    #[prost(int32, tag = "1")]
    pub data_type: i32,
    #[prost(int32, tag = "2")]
    pub format: i32,
    #[prost(message, optional, tag = "3")]
    pub shape: Option<Shape>,
    #[prost(uint64, tag = "4")]
    pub size: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct OpOutput {
    #[prost(int32, tag = "1")]
    pub data_type: i32,
    #[prost(int32, tag = "2")]
    pub format: i32,
    #[prost(message, optional, tag = "3")]
    pub shape: Option<Shape>,
    #[prost(uint64, tag = "5")]
    pub size: u64,
}

/// 异常现场文件的头部
#[derive(Clone, PartialEq, Message)]
pub struct DumpData {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(uint64, tag = "2")]
    pub dump_time: u64,
    #[prost(message, repeated, tag = "3")]
    pub output: Vec<OpOutput>,
    #[prost(message, repeated, tag = "4")]
    pub input: Vec<OpInput>,
    #[prost(string, tag = "6")]
    pub op_name: String,
}
