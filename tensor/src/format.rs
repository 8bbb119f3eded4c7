/// 张量存储格式，取值与设备侧协议一致
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
#[repr(i32)]
pub enum Format {
    Nchw = 0,
    Nhwc = 1,
    #[default]
    Nd = 2,
    Nc1hwc0 = 3,
    FractalZ = 4,
    Hwcn = 16,
    FractalNz = 29,
}

impl Format {
    pub const fn code(self) -> i32 {
        self as i32
    }
}
