use crate::{
    DumpError,
    proto::{self, Input, Output},
};
use exec::DevPtr;
use tensor::{
    Shape, TensorDesc,
    digit_layout::{DigitLayout, types},
};

/// 设备协议中的数据类型编码，表中没有的类型编码为 0
const DT_CODES: [(DigitLayout, i32); 11] = [
    (types::F32, 1),
    (types::F16, 2),
    (types::I8, 3),
    (types::U8, 4),
    (types::I16, 5),
    (types::U16, 6),
    (types::I32, 7),
    (types::I64, 8),
    (types::U32, 9),
    (types::U64, 10),
    (types::F64, 12),
];

pub(crate) fn dt_code(dt: DigitLayout) -> i32 {
    DT_CODES
        .iter()
        .find(|(d, _)| *d == dt)
        .map_or(0, |&(_, code)| code)
}

pub(crate) fn shape(shape: &Shape) -> proto::Shape {
    proto::Shape {
        dim: shape.to_dump_dims(),
    }
}

/// 从设备协议还原形状
pub fn decode_shape(shape: &proto::Shape) -> Shape {
    Shape::from_dump_dims(&shape.dim)
}

pub(crate) fn tensor_size(op: &str, desc: &TensorDesc) -> Result<u64, DumpError> {
    desc.nbytes().map(|n| n as _).ok_or_else(|| {
        DumpError::InvalidParameter(format!("size of a tensor of {op} is unknown"))
    })
}

pub(crate) fn input(op: &str, desc: &TensorDesc, addr: DevPtr) -> Result<Input, DumpError> {
    Ok(Input {
        data_type: dt_code(desc.dt()),
        format: desc.format().code(),
        shape: Some(shape(desc.shape())),
        address: addr.addr(),
        size: tensor_size(op, desc)?,
        origin_shape: desc.origin().shape.as_ref().map(shape),
    })
}

pub(crate) fn output(op: &str, desc: &TensorDesc, addr: DevPtr) -> Result<Output, DumpError> {
    let size = tensor_size(op, desc)?;
    Ok(output_with(desc, desc.shape(), size, addr))
}

/// 以指定的形状和大小编码输出
pub(crate) fn output_with(desc: &TensorDesc, dims: &Shape, size: u64, addr: DevPtr) -> Output {
    let origin = desc.origin();
    Output {
        data_type: dt_code(desc.dt()),
        format: desc.format().code(),
        shape: Some(shape(dims)),
        address: addr.addr(),
        original_name: origin.name.clone().unwrap_or_default(),
        original_output_index: origin.output_index.map_or(-1, |i| i as _),
        original_output_data_type: dt_code(origin.dt.unwrap_or(desc.dt())),
        original_output_format: origin.format.unwrap_or(desc.format()).code(),
        size,
        origin_shape: origin.shape.as_ref().map(shape),
    }
}
