use std::collections::HashMap;

/// 算子属性值
#[derive(Clone, PartialEq, Debug)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Arr(Box<[Self]>),
    Dict(HashMap<String, Self>),
}

macro_rules! impl_from {
    ($( $ty:ty => $variant:ident )+) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

impl_from! {
    bool   => Bool
    i64    => Int
    f64    => Float
    String => Str
        Box<       [Self]> => Arr
    HashMap<String, Self > => Dict
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl Arg {
    pub fn bool(value: bool) -> Self {
        value.into()
    }

    pub fn int(value: i64) -> Self {
        value.into()
    }

    pub fn float(value: f64) -> Self {
        value.into()
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn arr(value: impl IntoIterator<Item = Self>) -> Self {
        Self::Arr(value.into_iter().collect())
    }

    pub fn ints(value: impl IntoIterator<Item = i64>) -> Self {
        Self::arr(value.into_iter().map(Self::Int))
    }

    pub fn dict(value: impl IntoIterator<Item = (String, Self)>) -> Self {
        Self::Dict(value.into_iter().collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(val) => Some(val),
            _ => None,
        }
    }

    /// 整数列表属性，任一元素不是整数时返回 `None`
    pub fn as_ints(&self) -> Option<Vec<i64>> {
        match self {
            Self::Arr(args) => args.iter().map(Self::as_int).collect(),
            _ => None,
        }
    }
}
