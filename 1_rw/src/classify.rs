use crate::{InputRwType, OutputRwType};
use graph::{ComputeGraph, InAnchor, Node, OpRole, OutAnchor};
use log::warn;
use patricia_tree::PatriciaMap;
use std::collections::BTreeMap;

/// 一个节点各锚点的读写类型
#[derive(Clone, Default, Debug)]
struct NodeRwType {
    inputs: BTreeMap<usize, InputRwType>,
    outputs: BTreeMap<usize, OutputRwType>,
}

/// 读写类型登记表，只在一次图遍历内有效。
///
/// 子图边界节点（Data/NetOutput）的读写类型按节点名登记，
/// 拥有子图的节点据此推导自身锚点的读写类型。
#[derive(Default)]
pub struct RwContext {
    registry: PatriciaMap<NodeRwType>,
}

impl RwContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_input(&mut self, name: &str, idx: usize, ty: InputRwType) {
        match self.registry.get_mut(name) {
            Some(entry) => {
                entry.inputs.entry(idx).or_insert(ty);
            }
            None => {
                let mut entry = NodeRwType::default();
                entry.inputs.insert(idx, ty);
                self.registry.insert(name, entry);
            }
        }
    }

    pub(crate) fn record_output(&mut self, name: &str, idx: usize, ty: OutputRwType) {
        match self.registry.get_mut(name) {
            Some(entry) => {
                entry.outputs.entry(idx).or_insert(ty);
            }
            None => {
                let mut entry = NodeRwType::default();
                entry.outputs.insert(idx, ty);
                self.registry.insert(name, entry);
            }
        }
    }

    pub fn registered_input(&self, name: &str, idx: usize) -> Option<InputRwType> {
        self.registry.get(name)?.inputs.get(&idx).copied()
    }

    pub fn registered_output(&self, name: &str, idx: usize) -> Option<OutputRwType> {
        self.registry.get(name)?.outputs.get(&idx).copied()
    }

    /// 输出锚点的读写类型
    pub fn output_rw_type(&self, graph: &ComputeGraph, anchor: OutAnchor) -> OutputRwType {
        let Some(node) = graph.node(anchor.node) else {
            return OutputRwType::Invalid;
        };
        if anchor.idx >= node.n_outputs() {
            return OutputRwType::Invalid;
        }
        if node.role() == OpRole::While {
            return OutputRwType::SoftRead;
        }

        let fan_out = graph.out_peers(anchor).len();
        if !node.has_subgraphs() {
            return single_node_output(node, anchor.idx, fan_out);
        }

        let ty = match graph.subgraph_output_nodes(anchor.node).as_slice() {
            &[net_output] => {
                let name = graph.node(net_output).map_or("", Node::name);
                match self.registered_output(name, anchor.idx) {
                    Some(ty) => ty,
                    None => {
                        warn!("rw type of output {} of {name} not found", anchor.idx);
                        return OutputRwType::Invalid;
                    }
                }
            }
            _ => OutputRwType::SoftRead,
        };
        if fan_out > 1 {
            OutputRwType::ReadOnly
        } else {
            ty
        }
    }

    /// 输入锚点的读写类型
    pub fn input_rw_type(&self, graph: &ComputeGraph, anchor: InAnchor) -> InputRwType {
        let Some(node) = graph.node(anchor.node) else {
            return InputRwType::Invalid;
        };
        if anchor.idx >= node.n_inputs() {
            return InputRwType::Invalid;
        }
        if node.role() == OpRole::While {
            return InputRwType::ScopeWriteable;
        }
        if !node.has_subgraphs() {
            return single_node_input(node, anchor.idx);
        }

        let mut types = Vec::new();
        for data in graph.subgraph_data_nodes(anchor.node, anchor.idx) {
            let name = graph.node(data).map_or("", Node::name);
            match self.registered_input(name, 0) {
                Some(ty) => types.push(ty),
                None => {
                    warn!("rw type of subgraph input {name} not found");
                    return InputRwType::Invalid;
                }
            }
        }
        InputRwType::in_conflict(types)
    }
}

fn single_node_output(node: &Node, idx: usize, fan_out: usize) -> OutputRwType {
    match node.role() {
        OpRole::Variable | OpRole::RefSwitch => OutputRwType::Writeable,
        _ if node.desc().is_ref_output(idx) => OutputRwType::Writeable,
        OpRole::Constant => OutputRwType::ReadOnly,
        _ if fan_out > 1 => OutputRwType::ReadOnly,
        _ => OutputRwType::SoftRead,
    }
}

fn single_node_input(node: &Node, idx: usize) -> InputRwType {
    match node.role() {
        OpRole::Collective(_) => InputRwType::ScopeWriteable,
        _ if node.desc().is_ref_input(idx) => InputRwType::Writeable,
        OpRole::RefSwitch if idx == 0 => InputRwType::Writeable,
        _ => InputRwType::ReadOnly,
    }
}

#[cfg(test)]
mod test {
    use super::RwContext;
    use crate::{InputRwType, OutputRwType};
    use digit_layout::types as dt;
    use graph::{ComputeGraph, GraphId, OpDesc, attr, ty};
    use tensor::TensorDesc;

    fn desc() -> TensorDesc {
        TensorDesc::new(dt::F16, [4, 4])
    }

    #[test]
    fn test_single_node() {
        let mut g = ComputeGraph::new("root");
        let root = GraphId::ROOT;
        let v = g
            .add_node(root, OpDesc::new("v", ty::VARIABLE).output("y", desc()))
            .unwrap();
        let c = g
            .add_node(root, OpDesc::new("c", ty::CONSTANT).output("y", desc()))
            .unwrap();
        let add = g
            .add_node(
                root,
                OpDesc::new("add", "Add")
                    .input("x0", desc())
                    .input("x1", desc())
                    .output("y", desc()),
            )
            .unwrap();
        let assign = g
            .add_node(
                root,
                OpDesc::new("assign", "Assign")
                    .input("ref", desc())
                    .input("value", desc())
                    .output("ref", desc()),
            )
            .unwrap();
        let ar = g
            .add_node(
                root,
                OpDesc::new("ar", ty::HCOM_ALL_REDUCE)
                    .input("x", desc())
                    .output("y", desc()),
            )
            .unwrap();
        let ref_switch = g
            .add_node(
                root,
                OpDesc::new("rs", ty::FRAMEWORK_OP)
                    .attr(attr::ORIGINAL_TYPE, ty::REF_SWITCH)
                    .input("data", desc())
                    .input("pred", desc())
                    .output("false", desc()),
            )
            .unwrap();
        g.add_edge(v.out(0), assign.in_(0)).unwrap();
        g.add_edge(c.out(0), add.in_(0)).unwrap();
        g.add_edge(c.out(0), add.in_(1)).unwrap();
        g.add_edge(add.out(0), ar.in_(0)).unwrap();

        let ctx = RwContext::new();
        let out = |a| ctx.output_rw_type(&g, a);
        let in_ = |a| ctx.input_rw_type(&g, a);
        assert_eq!(out(v.out(0)), OutputRwType::Writeable);
        assert_eq!(out(c.out(0)), OutputRwType::ReadOnly);
        assert_eq!(out(add.out(0)), OutputRwType::SoftRead);
        assert_eq!(out(assign.out(0)), OutputRwType::Writeable);
        assert_eq!(out(ref_switch.out(0)), OutputRwType::Writeable);
        assert_eq!(out(add.out(1)), OutputRwType::Invalid);

        assert_eq!(in_(assign.in_(0)), InputRwType::Writeable);
        assert_eq!(in_(assign.in_(1)), InputRwType::ReadOnly);
        assert_eq!(in_(ar.in_(0)), InputRwType::ScopeWriteable);
        assert_eq!(in_(ref_switch.in_(0)), InputRwType::Writeable);
        assert_eq!(in_(ref_switch.in_(1)), InputRwType::ReadOnly);
        assert_eq!(in_(add.in_(2)), InputRwType::Invalid);
    }

    #[test]
    fn test_fan_out() {
        let mut g = ComputeGraph::new("root");
        let root = GraphId::ROOT;
        let a = g
            .add_node(root, OpDesc::new("a", "Relu").output("y", desc()))
            .unwrap();
        for name in ["b", "c"] {
            let n = g
                .add_node(root, OpDesc::new(name, "Neg").input("x", desc()))
                .unwrap();
            g.add_edge(a.out(0), n.in_(0)).unwrap();
        }
        assert_eq!(
            RwContext::new().output_rw_type(&g, a.out(0)),
            OutputRwType::ReadOnly
        );
    }

    #[test]
    fn test_with_subgraph() {
        let mut g = ComputeGraph::new("root");
        let if_ = g
            .add_node(
                GraphId::ROOT,
                OpDesc::new("if", ty::IF)
                    .input("x", desc())
                    .output("y", desc()),
            )
            .unwrap();
        let then = g.add_subgraph(if_, "then").unwrap();
        let data = g
            .add_node(
                then,
                OpDesc::new("then_x", ty::DATA)
                    .attr(attr::PARENT_NODE_INDEX, 0i64)
                    .output("y", desc()),
            )
            .unwrap();
        let out = g
            .add_node(then, OpDesc::new("then_y", ty::NET_OUTPUT).input("x", desc()))
            .unwrap();
        g.add_edge(data.out(0), out.in_(0)).unwrap();

        let mut ctx = RwContext::new();
        assert_eq!(ctx.input_rw_type(&g, if_.in_(0)), InputRwType::Invalid);
        assert_eq!(ctx.output_rw_type(&g, if_.out(0)), OutputRwType::Invalid);

        ctx.record_input("then_x", 0, InputRwType::Writeable);
        ctx.record_output("then_y", 0, OutputRwType::SoftRead);
        ctx.record_input("then_x", 0, InputRwType::ReadOnly);
        assert_eq!(ctx.input_rw_type(&g, if_.in_(0)), InputRwType::Writeable);
        assert_eq!(ctx.output_rw_type(&g, if_.out(0)), OutputRwType::SoftRead);
    }
}
