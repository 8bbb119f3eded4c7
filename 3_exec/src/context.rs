use crate::{DevPtr, Device, Exec, ExecError, RtError};
use log::{error, info, warn};
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering::Relaxed},
};

/// 流同步的结果
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Completion {
    Success,
    EndOfSequence,
    AbortNormal,
}

/// 完成码表，每种结果保留两个兼容的编码
const COMPLETION: [(u32, Completion); 5] = [
    (0, Completion::Success),
    (0x0704_000a, Completion::EndOfSequence),
    (507005, Completion::EndOfSequence),
    (0x0704_000e, Completion::AbortNormal),
    (507024, Completion::AbortNormal),
];

fn completion(code: u32) -> Option<Completion> {
    COMPLETION
        .iter()
        .find(|(c, _)| *c == code)
        .map(|&(_, completion)| completion)
}

/// 流同步的正常结果
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncStatus {
    /// 任务完成，包括正常中止
    Done,
    /// 数据源耗尽，执行应受控停止
    EndOfSequence,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// 一次执行的上下文，观察设备完成状态。
///
/// 状态可以被多个线程写入，以最后一次为准。
pub struct ExecutionContext<'d, D> {
    device: &'d D,
    id: u64,
    status: Mutex<Result<(), ExecError>>,
    is_eos: AtomicBool,
}

impl<'d, D: Device> ExecutionContext<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self {
            device,
            id: NEXT_ID.fetch_add(1, Relaxed),
            status: Mutex::new(Ok(())),
            is_eos: AtomicBool::new(false),
        }
    }

    pub const fn device(&self) -> &'d D {
        self.device
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    /// 最近一次同步是否遇到序列结束
    pub fn is_eos(&self) -> bool {
        self.is_eos.load(Relaxed)
    }

    pub fn set_error(&self, err: ExecError) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        *status = Err(err)
    }

    pub fn status(&self) -> Result<(), ExecError> {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 等待流上的任务完成，正常中止视为完成，序列结束单独报告
    pub fn synchronize(&self, stream: D::Stream) -> Result<SyncStatus, ExecError> {
        let code = match self.device.synchronize(stream) {
            Ok(()) => 0,
            Err(RtError(code)) => code,
        };
        match completion(code) {
            Some(Completion::Success) => {
                self.is_eos.store(false, Relaxed);
                Ok(SyncStatus::Done)
            }
            Some(Completion::EndOfSequence) => {
                info!("context #{} end of sequence on stream {stream:?}", self.id);
                self.is_eos.store(true, Relaxed);
                Ok(SyncStatus::EndOfSequence)
            }
            Some(Completion::AbortNormal) => {
                warn!("context #{} aborted on stream {stream:?}", self.id);
                self.is_eos.store(false, Relaxed);
                Ok(SyncStatus::Done)
            }
            None => {
                error!(
                    "context #{} synchronize stream {stream:?} failed with code {code:#x}",
                    self.id
                );
                let err = ExecError::Rt(RtError(code));
                self.set_error(err.clone());
                Err(err)
            }
        }
    }

    /// 编码参数块并下发任务
    pub fn launch(&self, stream: D::Stream, exec: &Exec<DevPtr>) -> Result<(), ExecError> {
        let args = exec.encode_args();
        self.device.launch(stream, &args).map_err(|RtError(code)| {
            error!(
                "launch task {} of {} on stream {} failed",
                exec.task_id,
                exec.node.name(),
                exec.stream_id
            );
            let err = ExecError::Device {
                op: exec.node.name().into(),
                task_id: exec.task_id,
                stream_id: exec.stream_id,
                code,
            };
            self.set_error(err.clone());
            err
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Completion, completion};

    #[test]
    fn test_completion_table() {
        assert_eq!(completion(0), Some(Completion::Success));
        assert_eq!(completion(0x0704_000a), Some(Completion::EndOfSequence));
        assert_eq!(completion(507005), Some(Completion::EndOfSequence));
        assert_eq!(completion(0x0704_000e), Some(Completion::AbortNormal));
        assert_eq!(completion(507024), Some(Completion::AbortNormal));
        assert_eq!(completion(0x0707_0001), None);
    }
}
