//! 带嵌套子图的计算图。
//!
//! 根图与所有子图的节点保存在同一个 arena 中，以 [`NodeId`] 索引；
//! 锚点只保存句柄，改写图时不会悬垂。

mod error;
mod op_desc;
mod topo;

use patricia_tree::PatriciaMap;

pub use error::GraphError;
pub use op_desc::{Collective, OpDesc, OpRole, Port, attr, ty};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct NodeId(usize);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct GraphId(usize);

impl GraphId {
    pub const ROOT: Self = Self(0);
}

/// 节点的第 `idx` 个输出
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OutAnchor {
    pub node: NodeId,
    pub idx: usize,
}

/// 节点的第 `idx` 个输入
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InAnchor {
    pub node: NodeId,
    pub idx: usize,
}

impl NodeId {
    pub const fn out(self, idx: usize) -> OutAnchor {
        OutAnchor { node: self, idx }
    }

    pub const fn in_(self, idx: usize) -> InAnchor {
        InAnchor { node: self, idx }
    }
}

pub struct Node {
    desc: OpDesc,
    role: OpRole,
    owner: GraphId,
    subgraphs: Vec<GraphId>,
    inputs: Vec<Option<OutAnchor>>,
    outputs: Vec<Vec<InAnchor>>,
    in_ctrl: Vec<NodeId>,
    out_ctrl: Vec<NodeId>,
}

impl Node {
    pub const fn desc(&self) -> &OpDesc {
        &self.desc
    }

    pub fn desc_mut(&mut self) -> &mut OpDesc {
        &mut self.desc
    }

    pub const fn role(&self) -> OpRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.desc.name()
    }

    pub fn ty(&self) -> &str {
        self.desc.ty()
    }

    pub const fn owner(&self) -> GraphId {
        self.owner
    }

    pub fn subgraphs(&self) -> &[GraphId] {
        &self.subgraphs
    }

    pub fn has_subgraphs(&self) -> bool {
        !self.subgraphs.is_empty()
    }

    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn in_ctrl(&self) -> &[NodeId] {
        &self.in_ctrl
    }

    pub fn out_ctrl(&self) -> &[NodeId] {
        &self.out_ctrl
    }
}

struct Subgraph {
    name: String,
    parent: Option<NodeId>,
    nodes: Vec<NodeId>,
}

pub struct ComputeGraph {
    nodes: Vec<Option<Node>>,
    graphs: Vec<Subgraph>,
    names: PatriciaMap<NodeId>,
    identity_seq: usize,
}

impl ComputeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            nodes: Vec::new(),
            graphs: vec![Subgraph {
                name: name.into(),
                parent: None,
                nodes: Vec::new(),
            }],
            names: PatriciaMap::default(),
            identity_seq: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.graphs[GraphId::ROOT.0].name
    }

    /// 向 `graph` 添加节点，锚点数量由算子描述的端口决定
    pub fn add_node(&mut self, graph: GraphId, desc: OpDesc) -> Result<NodeId, GraphError> {
        let Some(sub) = self.graphs.get_mut(graph.0) else {
            return Err(GraphError::GraphNotFound(graph.0));
        };
        if self.names.contains_key(desc.name()) {
            return Err(GraphError::DuplicateName(desc.name().into()));
        }

        let id = NodeId(self.nodes.len());
        sub.nodes.push(id);
        self.names.insert(desc.name(), id);
        self.nodes.push(Some(Node {
            role: OpRole::of(&desc),
            owner: graph,
            subgraphs: Vec::new(),
            inputs: vec![None; desc.inputs().len()],
            outputs: vec![Vec::new(); desc.outputs().len()],
            in_ctrl: Vec::new(),
            out_ctrl: Vec::new(),
            desc,
        }));
        Ok(id)
    }

    /// 为 `parent` 创建一个子图
    pub fn add_subgraph(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
    ) -> Result<GraphId, GraphError> {
        let id = GraphId(self.graphs.len());
        self.try_node_mut(parent)?.subgraphs.push(id);
        self.graphs.push(Subgraph {
            name: name.into(),
            parent: Some(parent),
            nodes: Vec::new(),
        });
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)?.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn subgraph_name(&self, graph: GraphId) -> Option<&str> {
        self.graphs.get(graph.0).map(|g| &*g.name)
    }

    pub fn direct_nodes(&self, graph: GraphId) -> &[NodeId] {
        self.graphs.get(graph.0).map_or(&[][..], |g| &g.nodes[..])
    }

    pub fn parent_node(&self, graph: GraphId) -> Option<NodeId> {
        self.graphs.get(graph.0)?.parent
    }

    pub fn has_subgraphs(&self) -> bool {
        self.graphs.len() > 1
    }

    /// 先序列出所有子图，父图总在其子图之前
    pub fn all_subgraphs(&self) -> Vec<GraphId> {
        let mut ans = Vec::new();
        for &node in self.direct_nodes(GraphId::ROOT) {
            self.collect_subgraphs(node, &mut ans)
        }
        ans
    }

    /// 先序列出全部节点，节点之后紧跟其子图中的节点
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut ans = Vec::new();
        self.collect_nodes(GraphId::ROOT, &mut ans);
        ans
    }

    fn collect_subgraphs(&self, node: NodeId, ans: &mut Vec<GraphId>) {
        let Some(node) = self.node(node) else { return };
        for &sub in &node.subgraphs {
            ans.push(sub);
            for &n in self.direct_nodes(sub) {
                self.collect_subgraphs(n, ans)
            }
        }
    }

    fn collect_nodes(&self, graph: GraphId, ans: &mut Vec<NodeId>) {
        for &id in self.direct_nodes(graph) {
            ans.push(id);
            if let Some(node) = self.node(id) {
                for &sub in &node.subgraphs {
                    self.collect_nodes(sub, ans)
                }
            }
        }
    }

    /// `node` 的子图中对应父节点第 `index` 个输入的 Data 节点
    pub fn subgraph_data_nodes(&self, node: NodeId, index: usize) -> Vec<NodeId> {
        self.subgraph_nodes_of(node, |n| {
            n.role == OpRole::Data && n.desc.parent_node_index() == Some(index)
        })
    }

    /// `node` 的子图中的 NetOutput 节点
    pub fn subgraph_output_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.subgraph_nodes_of(node, |n| n.role == OpRole::NetOutput)
    }

    fn subgraph_nodes_of(&self, node: NodeId, f: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        let Some(node) = self.node(node) else {
            return Vec::new();
        };
        node.subgraphs
            .iter()
            .flat_map(|&sub| self.direct_nodes(sub))
            .copied()
            .filter(|&id| self.node(id).is_some_and(&f))
            .collect()
    }

    /// 子图的入口 Data 节点
    pub fn is_subgraph_input(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| {
            n.role == OpRole::Data
                && self.parent_node(n.owner).is_some()
                && n.desc.parent_node_index().is_some()
        })
    }

    /// 子图的出口 NetOutput 节点
    pub fn is_subgraph_output(&self, id: NodeId) -> bool {
        self.node(id)
            .is_some_and(|n| n.role == OpRole::NetOutput && self.parent_node(n.owner).is_some())
    }

    /// 为 `src` 之后插入的 Identity 生成图内唯一的名字
    pub fn next_identity_name(&mut self, src: &str) -> String {
        loop {
            let n = self.identity_seq;
            self.identity_seq += 1;
            let name = format!("{src}_{}{n}", ty::IDENTITY);
            if !self.names.contains_key(&name) {
                break name;
            }
        }
    }

    pub fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound(id.0))
    }

    fn try_node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id).ok_or(GraphError::NodeNotFound(id.0))
    }
}

#[cfg(test)]
mod test {
    use super::{ComputeGraph, GraphError, GraphId, OpDesc, attr, ty};

    #[test]
    fn test_order() {
        let mut g = ComputeGraph::new("root");
        let a = g.add_node(GraphId::ROOT, OpDesc::new("a", "Add")).unwrap();
        let if_ = g.add_node(GraphId::ROOT, OpDesc::new("if", ty::IF)).unwrap();
        let then = g.add_subgraph(if_, "then").unwrap();
        let else_ = g.add_subgraph(if_, "else").unwrap();
        let t = g
            .add_node(then, OpDesc::new("t", ty::DATA).attr(attr::PARENT_NODE_INDEX, 0i64))
            .unwrap();
        let while_ = g.add_node(then, OpDesc::new("w", ty::WHILE)).unwrap();
        let body = g.add_subgraph(while_, "body").unwrap();
        let b = g.add_node(body, OpDesc::new("b", "Mul")).unwrap();
        let e = g.add_node(else_, OpDesc::new("e", ty::NET_OUTPUT)).unwrap();
        let z = g.add_node(GraphId::ROOT, OpDesc::new("z", "Sub")).unwrap();

        assert_eq!(g.all_subgraphs(), [then, body, else_]);
        assert_eq!(g.all_nodes(), [a, if_, t, while_, b, e, z]);
        assert_eq!(g.subgraph_data_nodes(if_, 0), [t]);
        assert!(g.subgraph_data_nodes(if_, 1).is_empty());
        assert_eq!(g.subgraph_output_nodes(if_), [e]);
        assert!(g.is_subgraph_input(t));
        assert!(g.is_subgraph_output(e));
        assert_eq!(g.parent_node(body), Some(while_));
        assert_eq!(g.find_node("b"), Some(b));
    }

    #[test]
    fn test_names() {
        let mut g = ComputeGraph::new("root");
        g.add_node(GraphId::ROOT, OpDesc::new("v_Identity0", ty::IDENTITY))
            .unwrap();
        assert!(matches!(
            g.add_node(GraphId::ROOT, OpDesc::new("v_Identity0", ty::IDENTITY)),
            Err(GraphError::DuplicateName(_))
        ));
        assert_eq!(g.next_identity_name("v"), "v_Identity1");
        assert_eq!(g.next_identity_name("v"), "v_Identity2");
    }
}
