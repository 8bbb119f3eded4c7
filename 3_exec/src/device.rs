use std::fmt;
use thiserror::Error;

/// 设备地址
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DevPtr(u64);

impl DevPtr {
    pub const NULL: Self = Self(0);

    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for DevPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 设备运行时返回的错误码
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("device runtime error code {0:#x}")]
pub struct RtError(pub u32);

/// 存储复制
pub enum Memcpy<'a, S> {
    HostToDevice {
        dst: DevPtr,
        src: &'a [u8],
    },
    DeviceToHost {
        dst: &'a mut [u8],
        src: DevPtr,
    },
    /// 在流上异步执行
    DeviceToDevice {
        dst: DevPtr,
        src: DevPtr,
        size: usize,
        stream: S,
    },
}

/// 加速器运行时
pub trait Device {
    type Stream: Copy + fmt::Debug;

    fn alloc(&self, size: usize) -> Option<DevPtr>;
    fn free(&self, ptr: DevPtr);
    fn copy(&self, kind: Memcpy<'_, Self::Stream>) -> Result<(), RtError>;
    /// 阻塞到流上的任务全部完成，错误携带完成码
    fn synchronize(&self, stream: Self::Stream) -> Result<(), RtError>;
    fn launch(&self, stream: Self::Stream, task: &[u8]) -> Result<(), RtError>;
    /// 把序列化的 dump 描述交给设备
    fn load_dump_info(&self, ptr: DevPtr, size: usize) -> Result<(), RtError>;
}
