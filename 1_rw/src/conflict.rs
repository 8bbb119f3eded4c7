use crate::{InputRwType, OutputRwType};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ConflictResult {
    DoNothing,
    WrongGraph,
    InsertIdentity,
}

use ConflictResult::{DoNothing as DN, InsertIdentity as II};

/// 行：输出 ReadOnly/SoftRead/Writeable；列：输入 ReadOnly/Writeable/ScopeWriteable
const TABLE: [[ConflictResult; 3]; 3] = [
    [DN, II, II],
    [DN, DN, DN],
    [II, DN, II],
];

/// 相邻两个锚点之间需要的处理，任一侧无效时图错误
pub const fn conflict_between(output: OutputRwType, input: InputRwType) -> ConflictResult {
    let row = match output {
        OutputRwType::ReadOnly => 0,
        OutputRwType::SoftRead => 1,
        OutputRwType::Writeable => 2,
        OutputRwType::Invalid => return ConflictResult::WrongGraph,
    };
    let col = match input {
        InputRwType::ReadOnly => 0,
        InputRwType::Writeable => 1,
        InputRwType::ScopeWriteable => 2,
        InputRwType::Invalid => return ConflictResult::WrongGraph,
    };
    TABLE[row][col]
}

#[cfg(test)]
mod test {
    use super::{ConflictResult, conflict_between};
    use crate::{InputRwType, OutputRwType};

    const OUTPUTS: [OutputRwType; 3] = [
        OutputRwType::ReadOnly,
        OutputRwType::SoftRead,
        OutputRwType::Writeable,
    ];
    const INPUTS: [InputRwType; 3] = [
        InputRwType::ReadOnly,
        InputRwType::Writeable,
        InputRwType::ScopeWriteable,
    ];

    #[test]
    fn test_total() {
        for output in OUTPUTS {
            for input in INPUTS {
                assert_ne!(conflict_between(output, input), ConflictResult::WrongGraph)
            }
            assert_eq!(
                conflict_between(output, InputRwType::Invalid),
                ConflictResult::WrongGraph
            )
        }
        for input in INPUTS {
            assert_eq!(
                conflict_between(OutputRwType::Invalid, input),
                ConflictResult::WrongGraph
            )
        }
    }

    #[test]
    fn test_policy() {
        use ConflictResult::*;
        // 可写输出不能被只读消费者别名
        assert_eq!(
            conflict_between(OutputRwType::Writeable, InputRwType::ReadOnly),
            InsertIdentity
        );
        assert_eq!(
            conflict_between(OutputRwType::Writeable, InputRwType::Writeable),
            DoNothing
        );
        assert_eq!(
            conflict_between(OutputRwType::ReadOnly, InputRwType::Writeable),
            InsertIdentity
        );
        for input in INPUTS {
            assert_eq!(conflict_between(OutputRwType::SoftRead, input), DoNothing)
        }
    }
}
