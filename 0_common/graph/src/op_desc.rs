use arg::Arg;
use std::collections::HashMap;
use tensor::TensorDesc;

/// 算子类型名
pub mod ty {
    pub const DATA: &str = "Data";
    pub const NET_OUTPUT: &str = "NetOutput";
    pub const WHILE: &str = "While";
    pub const IF: &str = "If";
    pub const IDENTITY: &str = "Identity";
    pub const IDENTITY_N: &str = "IdentityN";
    pub const READ_VARIABLE_OP: &str = "ReadVariableOp";
    pub const VARIABLE: &str = "Variable";
    pub const CONSTANT: &str = "Const";
    pub const CONSTANT_OP: &str = "Constant";
    pub const HCOM_ALL_REDUCE: &str = "HcomAllReduce";
    pub const HCOM_ALL_GATHER: &str = "HcomAllGather";
    pub const HCOM_REDUCE_SCATTER: &str = "HcomReduceScatter";
    pub const FRAMEWORK_OP: &str = "FrameworkOp";
    pub const REF_SWITCH: &str = "RefSwitch";
    pub const STREAM_MERGE: &str = "StreamMerge";
}

/// 算子属性名
pub mod attr {
    /// 子图 Data/NetOutput 对应父节点的锚点序号
    pub const PARENT_NODE_INDEX: &str = "_parent_node_index";
    /// 框架算子的原始类型
    pub const ORIGINAL_TYPE: &str = "original_type";
    pub const INPUT_MEM_TYPE_LIST: &str = "_input_memory_type";
    pub const OUTPUT_MEM_TYPE_LIST: &str = "_output_memory_type";
}

/// 算子端口，名字相同的输入与输出构成引用关系
#[derive(Clone, PartialEq, Debug)]
pub struct Port {
    pub name: String,
    pub desc: TensorDesc,
}

#[derive(Clone, Debug)]
pub struct OpDesc {
    name: String,
    ty: String,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    attrs: HashMap<String, Arg>,
}

impl OpDesc {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: HashMap::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.inputs.push(Port {
            name: name.into(),
            desc,
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.outputs.push(Port {
            name: name.into(),
            desc,
        });
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Arg>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn get_attr(&self, key: &str) -> Option<&Arg> {
        self.attrs.get(key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input_desc(&self, idx: usize) -> Option<&TensorDesc> {
        self.inputs.get(idx).map(|p| &p.desc)
    }

    pub fn output_desc(&self, idx: usize) -> Option<&TensorDesc> {
        self.outputs.get(idx).map(|p| &p.desc)
    }

    /// 输出与某个输入同名，即原地写入该输入
    pub fn is_ref_output(&self, idx: usize) -> bool {
        self.outputs
            .get(idx)
            .is_some_and(|out| self.inputs.iter().any(|i| i.name == out.name))
    }

    pub fn is_ref_input(&self, idx: usize) -> bool {
        self.inputs
            .get(idx)
            .is_some_and(|in_| self.outputs.iter().any(|o| o.name == in_.name))
    }

    pub fn parent_node_index(&self) -> Option<usize> {
        self.get_attr(attr::PARENT_NODE_INDEX)?
            .as_int()
            .and_then(|i| usize::try_from(i).ok())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Collective {
    AllReduce,
    AllGather,
    ReduceScatter,
}

/// 读写分析关心的算子角色，节点加入图时确定
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OpRole {
    Data,
    NetOutput,
    While,
    Identity,
    ReadVariable,
    Variable,
    Constant,
    Collective(Collective),
    RefSwitch,
    StreamMerge,
    Compute,
}

impl OpRole {
    pub fn of(desc: &OpDesc) -> Self {
        match desc.ty() {
            ty::DATA => Self::Data,
            ty::NET_OUTPUT => Self::NetOutput,
            ty::WHILE => Self::While,
            ty::IDENTITY => Self::Identity,
            ty::READ_VARIABLE_OP => Self::ReadVariable,
            ty::VARIABLE => Self::Variable,
            ty::CONSTANT | ty::CONSTANT_OP => Self::Constant,
            ty::HCOM_ALL_REDUCE => Self::Collective(Collective::AllReduce),
            ty::HCOM_ALL_GATHER => Self::Collective(Collective::AllGather),
            ty::HCOM_REDUCE_SCATTER => Self::Collective(Collective::ReduceScatter),
            ty::STREAM_MERGE => Self::StreamMerge,
            ty::FRAMEWORK_OP
                if desc
                    .get_attr(attr::ORIGINAL_TYPE)
                    .and_then(Arg::as_str)
                    .is_some_and(|t| t == ty::REF_SWITCH) =>
            {
                Self::RefSwitch
            }
            _ => Self::Compute,
        }
    }

    /// 复制类节点：Identity 与 ReadVariableOp
    pub const fn is_copy(self) -> bool {
        matches!(self, Self::Identity | Self::ReadVariable)
    }
}
