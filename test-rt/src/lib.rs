//! 内存中模拟的加速器，供测试使用。

use exec::{DevPtr, Device, Memcpy, RtError};
use log::info;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

/// 分配地址的起点，避开空指针
const BASE: u64 = 0x1_0000;
/// 相邻两次分配之间的间隔
const ALIGN: u64 = 0x100;
/// 找不到目标存储时返回的错误码
pub const INVALID_ADDR: u32 = 0x0710_0001;

#[derive(Default)]
#[repr(transparent)]
pub struct TestDevice(Mutex<Internal>);

#[derive(Default)]
struct Internal {
    next_addr: u64,
    mem: BTreeMap<u64, Vec<u8>>,
    sync_codes: VecDeque<u32>,
    launch_codes: VecDeque<u32>,
    launches: Vec<(u32, Vec<u8>)>,
    loads: Vec<Vec<u8>>,
}

impl Internal {
    /// 找到包含 `[addr, addr + len)` 的分配
    fn locate(&mut self, addr: u64, len: usize) -> Result<&mut [u8], RtError> {
        let (&base, blob) = self
            .mem
            .range_mut(..=addr)
            .next_back()
            .ok_or(RtError(INVALID_ADDR))?;
        let start = (addr - base) as usize;
        blob.get_mut(start..start + len).ok_or(RtError(INVALID_ADDR))
    }
}

impl TestDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn internal(&self) -> MutexGuard<'_, Internal> {
        self.0.lock().unwrap()
    }

    /// 下一次同步返回 `code`，没有脚本时同步成功
    pub fn push_sync_code(&self, code: u32) {
        self.internal().sync_codes.push_back(code)
    }

    /// 下一次下发任务返回 `code`
    pub fn fail_next_launch(&self, code: u32) {
        self.internal().launch_codes.push_back(code)
    }

    /// 所有下发的任务：流与参数块
    pub fn launches(&self) -> Vec<(u32, Vec<u8>)> {
        self.internal().launches.clone()
    }

    /// 所有加载过的 dump 描述
    pub fn loads(&self) -> Vec<Vec<u8>> {
        self.internal().loads.clone()
    }

    /// 仍未释放的分配数量
    pub fn n_allocs(&self) -> usize {
        self.internal().mem.len()
    }

    pub fn write(&self, dst: DevPtr, data: &[u8]) {
        self.internal()
            .locate(dst.addr(), data.len())
            .unwrap()
            .copy_from_slice(data)
    }

    pub fn read(&self, src: DevPtr, len: usize) -> Vec<u8> {
        self.internal().locate(src.addr(), len).unwrap().to_vec()
    }
}

impl Device for TestDevice {
    type Stream = u32;

    fn alloc(&self, size: usize) -> Option<DevPtr> {
        let mut internal = self.internal();
        let addr = BASE + internal.next_addr;
        internal.next_addr += (size as u64).div_ceil(ALIGN).max(1) * ALIGN;
        internal.mem.insert(addr, vec![0; size]);
        info!("[rt] alloc {size} bytes @ {addr:#x}");
        Some(DevPtr::new(addr))
    }

    fn free(&self, ptr: DevPtr) {
        info!("[rt] free {ptr:?}");
        assert!(self.internal().mem.remove(&ptr.addr()).is_some())
    }

    fn copy(&self, kind: Memcpy<'_, u32>) -> Result<(), RtError> {
        let mut internal = self.internal();
        match kind {
            Memcpy::HostToDevice { dst, src } => {
                info!("[rt] copy {} bytes host -> {dst:?}", src.len());
                internal.locate(dst.addr(), src.len())?.copy_from_slice(src)
            }
            Memcpy::DeviceToHost { dst, src } => {
                info!("[rt] copy {} bytes {src:?} -> host", dst.len());
                dst.copy_from_slice(internal.locate(src.addr(), dst.len())?)
            }
            Memcpy::DeviceToDevice {
                dst,
                src,
                size,
                stream,
            } => {
                info!("[rt:{stream}] copy {size} bytes {src:?} -> {dst:?}");
                let data = internal.locate(src.addr(), size)?.to_vec();
                internal.locate(dst.addr(), size)?.copy_from_slice(&data)
            }
        }
        Ok(())
    }

    fn synchronize(&self, stream: u32) -> Result<(), RtError> {
        let code = self.internal().sync_codes.pop_front().unwrap_or(0);
        info!("[rt:{stream}] synchronize -> {code:#x}");
        match code {
            0 => Ok(()),
            code => Err(RtError(code)),
        }
    }

    fn launch(&self, stream: u32, task: &[u8]) -> Result<(), RtError> {
        let mut internal = self.internal();
        if let Some(code) = internal.launch_codes.pop_front() {
            info!("[rt:{stream}] launch failed -> {code:#x}");
            return Err(RtError(code));
        }
        info!("[rt:{stream}] launch task with {} bytes of args", task.len());
        internal.launches.push((stream, task.to_vec()));
        Ok(())
    }

    fn load_dump_info(&self, ptr: DevPtr, size: usize) -> Result<(), RtError> {
        let mut internal = self.internal();
        let info = internal.locate(ptr.addr(), size)?.to_vec();
        info!("[rt] load dump info {size} bytes @ {ptr:?}");
        internal.loads.push(info);
        Ok(())
    }
}
