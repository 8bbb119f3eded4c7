/// 未知秩形状在设备协议中的唯一维度
pub const UNKNOWN_RANK_DIM: u64 = -2i64 as u64;

/// 张量形状，空维度列表表示标量
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Shape {
    Known(Box<[usize]>),
    UnknownRank,
}

impl Shape {
    pub fn scalar() -> Self {
        Self::Known(Box::new([]))
    }

    pub fn dims(&self) -> Option<&[usize]> {
        match self {
            Self::Known(dims) => Some(dims),
            Self::UnknownRank => None,
        }
    }

    pub fn to_dump_dims(&self) -> Vec<u64> {
        match self {
            Self::Known(dims) => dims.iter().map(|&d| d as u64).collect(),
            Self::UnknownRank => vec![UNKNOWN_RANK_DIM],
        }
    }

    pub fn from_dump_dims(dims: &[u64]) -> Self {
        match dims {
            [UNKNOWN_RANK_DIM] => Self::UnknownRank,
            dims => Self::Known(dims.iter().map(|&d| d as usize).collect()),
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self::Known(value.into())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(value: Vec<usize>) -> Self {
        Self::Known(value.into())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Self::Known(value.into())
    }
}

#[cfg(test)]
mod test {
    use super::{Shape, UNKNOWN_RANK_DIM};

    #[test]
    fn test_dump_dims() {
        for shape in [
            Shape::scalar(),
            Shape::from([0]),
            Shape::from([7, 1, 3, 2048]),
            Shape::UnknownRank,
        ] {
            assert_eq!(Shape::from_dump_dims(&shape.to_dump_dims()), shape)
        }
        assert!(Shape::scalar().to_dump_dims().is_empty());
        assert_eq!(Shape::UnknownRank.to_dump_dims(), [UNKNOWN_RANK_DIM]);
    }
}
