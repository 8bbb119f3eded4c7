//! 任务下发与执行。
//!
//! 改写后的计算图展开为按拓扑序排列的任务，经 [`Device`] 下发并观察完成状态。

mod context;
mod device;
mod error;
mod rts;

use graph::{ComputeGraph, OpDesc, OpRole, OutAnchor};
use std::collections::HashMap;

pub use context::{ExecutionContext, SyncStatus};
pub use device::{DevPtr, Device, Memcpy, RtError};
pub use error::ExecError;
pub use rts::RtsTask;

/// 参数块中每个地址占用的字节数
pub const ADDR_LEN: usize = size_of::<u64>();

/// 一个调度任务：算子描述与输入输出的存储
pub struct Exec<T> {
    pub node: OpDesc,
    pub task_id: u32,
    pub stream_id: u32,
    pub inputs: Box<[T]>,
    pub outputs: Box<[T]>,
}

impl Exec<DevPtr> {
    /// 参数块：先输入地址后输出地址，小端序
    pub fn encode_args(&self) -> Vec<u8> {
        self.inputs
            .iter()
            .chain(&*self.outputs)
            .flat_map(|ptr| ptr.addr().to_le_bytes())
            .collect()
    }
}

/// 按拓扑序把计算图展开为任务列表，子图边界节点不产生任务。
///
/// `assign` 为每个输出锚点分配一次存储。
pub fn into_exec<T: Clone>(
    graph: &ComputeGraph,
    stream_id: u32,
    mut assign: impl FnMut(OutAnchor) -> T,
) -> Result<Box<[Exec<T>]>, ExecError> {
    let order = graph
        .topo_nodes()
        .map_err(|e| ExecError::InvalidParameter(e.to_string()))?;

    let mut mem = HashMap::<OutAnchor, T>::new();
    let mut ans = Vec::with_capacity(order.len());
    for id in order {
        let Some(node) = graph.node(id) else { continue };
        if matches!(node.role(), OpRole::Data | OpRole::NetOutput) {
            continue;
        }

        let inputs = (0..node.n_inputs())
            .map(|i| match graph.in_peer(id.in_(i)) {
                Some(src) => Ok(mem.entry(src).or_insert_with(|| assign(src)).clone()),
                None => Err(ExecError::InvalidParameter(format!(
                    "input {i} of {} is not linked",
                    node.name()
                ))),
            })
            .collect::<Result<Box<_>, _>>()?;
        let outputs = (0..node.n_outputs())
            .map(|i| {
                let src = id.out(i);
                mem.entry(src).or_insert_with(|| assign(src)).clone()
            })
            .collect();

        ans.push(Exec {
            node: node.desc().clone(),
            task_id: ans.len() as _,
            stream_id,
            inputs,
            outputs,
        })
    }
    Ok(ans.into())
}
