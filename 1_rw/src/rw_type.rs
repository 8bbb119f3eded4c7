use itertools::Itertools;
use std::fmt;

/// 输入锚点的读写类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum InputRwType {
    /// 只读
    ReadOnly,
    /// 原地写入，如 Assign
    Writeable,
    /// 写入但不应影响上游输出，如 HcomAllReduce
    ScopeWriteable,
    Invalid,
}

/// 输出锚点的读写类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OutputRwType {
    /// 常量输出，或有多个消费者的普通输出
    ReadOnly,
    /// 只有一个消费者的普通输出
    SoftRead,
    /// 引用输出
    Writeable,
    Invalid,
}

impl InputRwType {
    const fn weight(self) -> u32 {
        match self {
            Self::ReadOnly => 0,
            Self::ScopeWriteable => 2,
            Self::Writeable => 3,
            Self::Invalid => 4,
        }
    }

    /// 汇总多个分支对同一个 Data 节点的读写要求。
    ///
    /// 对出现过的类型求权重和后查表，写入与作用域写入同时出现或存在无效类型时结果无效。
    pub fn in_conflict(types: impl IntoIterator<Item = Self>) -> Self {
        match types.into_iter().unique().map(Self::weight).sum::<u32>() {
            0 => Self::ReadOnly,
            2 => Self::ScopeWriteable,
            3 => Self::Writeable,
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for InputRwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "ReadOnly",
            Self::Writeable => "Writeable",
            Self::ScopeWriteable => "ScopeWriteable",
            Self::Invalid => "InvalidRWType",
        })
    }
}

impl fmt::Display for OutputRwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "ReadOnly",
            Self::SoftRead => "SoftRead",
            Self::Writeable => "Writeable",
            Self::Invalid => "InvalidRWType",
        })
    }
}
