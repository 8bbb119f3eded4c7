use crate::{DevPtr, Device, Exec, ExecError, ExecutionContext, Memcpy};
use graph::ty;
use log::{debug, warn};

/// 运行时直接执行的节点，不需要算子核函数
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RtsTask {
    /// 输入 0 复制到输出 0
    Identity,
    /// 输入 i 复制到输出 i
    IdentityN,
}

impl RtsTask {
    pub fn load(op_type: &str) -> Result<Self, ExecError> {
        match op_type {
            ty::IDENTITY => Ok(Self::Identity),
            ty::IDENTITY_N => Ok(Self::IdentityN),
            _ => Err(ExecError::Unsupported(op_type.into())),
        }
    }

    pub fn execute<D: Device>(
        self,
        ctx: &ExecutionContext<D>,
        stream: D::Stream,
        exec: &Exec<DevPtr>,
    ) -> Result<(), ExecError> {
        let op = &exec.node;
        let n = match self {
            Self::Identity => 1,
            Self::IdentityN => op.inputs().len(),
        };
        if op.inputs().len() < n
            || op.outputs().len() < n
            || exec.inputs.len() != op.inputs().len()
            || exec.outputs.len() != op.outputs().len()
        {
            return Err(ExecError::ShapeOrSizeMismatch(format!(
                "{} has {} inputs, {} outputs, but {} input and {} output addresses",
                op.name(),
                op.inputs().len(),
                op.outputs().len(),
                exec.inputs.len(),
                exec.outputs.len(),
            )));
        }

        for i in 0..n {
            let size = op
                .output_desc(i)
                .and_then(|desc| desc.nbytes())
                .unwrap_or(0);
            if size == 0 {
                warn!("output {i} of {} is empty, skip copy", op.name());
                continue;
            }
            debug!(
                "{} copy {size} bytes {:?} -> {:?}",
                op.name(),
                exec.inputs[i],
                exec.outputs[i]
            );
            ctx.device().copy(Memcpy::DeviceToDevice {
                dst: exec.outputs[i],
                src: exec.inputs[i],
                size,
                stream,
            })?
        }
        Ok(())
    }
}
