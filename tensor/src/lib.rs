mod format;
mod shape;

use digit_layout::DigitLayout;
use ndarray_layout::{ArrayLayout, Endian::BigEndian};
use std::borrow::Cow;

pub use format::Format;
pub use shape::{Shape, UNKNOWN_RANK_DIM};

pub extern crate digit_layout;
pub extern crate ndarray_layout;

/// 张量描述：数据类型、格式、形状，以及用于追溯的原始信息
#[derive(Clone, PartialEq, Debug)]
pub struct TensorDesc {
    dt: DigitLayout,
    format: Format,
    shape: Shape,
    origin: Origin,
    dump_ref: Option<String>,
    size: Option<usize>,
}

/// 图变换之前的张量信息
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Origin {
    pub name: Option<String>,
    pub output_index: Option<u32>,
    pub dt: Option<DigitLayout>,
    pub format: Option<Format>,
    pub shape: Option<Shape>,
}

impl TensorDesc {
    pub fn new(dt: DigitLayout, shape: impl Into<Shape>) -> Self {
        Self {
            dt,
            format: Format::Nd,
            shape: shape.into(),
            origin: Origin::default(),
            dump_ref: None,
            size: None,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// 标记此张量实际指向另一个算子的存储，格式为 `<node>:<input|output>:<index>`
    pub fn with_dump_ref(mut self, dump_ref: impl Into<String>) -> Self {
        self.dump_ref = Some(dump_ref.into());
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub const fn dt(&self) -> DigitLayout {
        self.dt
    }

    pub const fn format(&self) -> Format {
        self.format
    }

    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dump_ref(&self) -> Option<&str> {
        self.dump_ref.as_deref()
    }

    /// 张量占用的字节数，未知秩时无法计算
    pub fn nbytes(&self) -> Option<usize> {
        if let Some(size) = self.size {
            return Some(size);
        }
        let dims = self.shape.dims()?;
        let shape = match self.dt.group_size() {
            1 => Cow::Borrowed(dims),
            g => {
                let mut shape = dims.to_vec();
                let last = shape.last_mut()?;
                if *last % g != 0 {
                    return None;
                }
                *last /= g;
                Cow::Owned(shape)
            }
        };

        let element_size = self.dt.nbytes();
        let layout = ArrayLayout::<4>::new_contiguous(&shape, BigEndian, element_size);
        Some(layout.num_elements() * element_size)
    }
}
