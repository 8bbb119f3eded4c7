use crate::{ComputeGraph, GraphError, GraphId, InAnchor, Node, NodeId, OutAnchor};
use log::debug;
use std::collections::{HashMap, VecDeque};

impl ComputeGraph {
    /// 连接到输入锚点的输出锚点
    pub fn in_peer(&self, dst: InAnchor) -> Option<OutAnchor> {
        *self.node(dst.node)?.inputs.get(dst.idx)?
    }

    /// 输出锚点连接的所有输入锚点
    pub fn out_peers(&self, src: OutAnchor) -> &[InAnchor] {
        self.node(src.node)
            .and_then(|n| n.outputs.get(src.idx))
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn in_data_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map_or_else(Vec::new, |n| {
            n.inputs.iter().flatten().map(|a| a.node).collect()
        })
    }

    /// 所有输出锚点的对端节点，按锚点顺序，可能重复
    pub fn out_data_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map_or_else(Vec::new, |n| {
            n.outputs.iter().flatten().map(|a| a.node).collect()
        })
    }

    pub fn out_data_nodes_size(&self, id: NodeId) -> usize {
        self.node(id)
            .map_or(0, |n| n.outputs.iter().map(Vec::len).sum())
    }

    /// 拓扑序列出全部节点。
    ///
    /// 同一子图内按数据边与控制边排序，没有依赖的节点保持加入图的顺序；
    /// 拥有子图的节点之后紧跟其子图中的节点。
    pub fn topo_nodes(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut ans = Vec::new();
        self.collect_topo(GraphId::ROOT, &mut ans)?;
        Ok(ans)
    }

    fn collect_topo(&self, graph: GraphId, ans: &mut Vec<NodeId>) -> Result<(), GraphError> {
        let nodes = self.direct_nodes(graph);
        let mut degree = HashMap::with_capacity(nodes.len());
        for &id in nodes {
            degree.insert(id, 0usize);
        }
        let mut successors = HashMap::<NodeId, Vec<NodeId>>::new();
        for &id in nodes {
            let node = self.try_node(id)?;
            for succ in node
                .outputs
                .iter()
                .flatten()
                .map(|a| a.node)
                .chain(node.out_ctrl.iter().copied())
            {
                // 跨子图的边不参与排序
                if let Some(d) = degree.get_mut(&succ) {
                    *d += 1;
                    successors.entry(id).or_default().push(succ)
                }
            }
        }

        let mut ready = nodes
            .iter()
            .copied()
            .filter(|id| degree[id] == 0)
            .collect::<VecDeque<_>>();
        let mut count = 0;
        while let Some(id) = ready.pop_front() {
            count += 1;
            ans.push(id);
            for &sub in &self.try_node(id)?.subgraphs {
                self.collect_topo(sub, ans)?
            }
            for succ in successors.remove(&id).unwrap_or_default() {
                let Some(d) = degree.get_mut(&succ) else {
                    continue;
                };
                *d -= 1;
                if *d == 0 {
                    ready.push_back(succ)
                }
            }
        }

        if count == nodes.len() {
            Ok(())
        } else {
            let name = self.subgraph_name(graph).unwrap_or_default();
            Err(GraphError::Cyclic(name.into()))
        }
    }

    pub fn add_edge(&mut self, src: OutAnchor, dst: InAnchor) -> Result<(), GraphError> {
        check_out(self.try_node(src.node)?, src.idx)?;
        let dst_node = self.try_node_mut(dst.node)?;
        check_in(dst_node, dst.idx)?;
        let slot = &mut dst_node.inputs[dst.idx];
        if slot.is_some() {
            return Err(GraphError::InputOccupied {
                node: dst_node.name().into(),
                idx: dst.idx,
            });
        }
        *slot = Some(src);
        self.try_node_mut(src.node)?.outputs[src.idx].push(dst);
        Ok(())
    }

    pub fn remove_edge(&mut self, src: OutAnchor, dst: InAnchor) -> Result<(), GraphError> {
        if self.in_peer(dst) != Some(src) {
            return Err(self.edge_not_found(src.node, dst.node));
        }
        self.try_node_mut(dst.node)?.inputs[dst.idx] = None;
        self.try_node_mut(src.node)?.outputs[src.idx].retain(|&a| a != dst);
        Ok(())
    }

    /// 在数据边 `src -> dst` 上插入单输入单输出节点，`src` 的对端顺序不变
    pub fn insert_between(
        &mut self,
        src: OutAnchor,
        dst: InAnchor,
        node: NodeId,
    ) -> Result<(), GraphError> {
        if self.in_peer(dst) != Some(src) {
            return Err(self.edge_not_found(src.node, dst.node));
        }
        {
            let n = self.try_node_mut(node)?;
            check_in(n, 0)?;
            check_out(n, 0)?;
            if n.inputs[0].is_some() {
                return Err(GraphError::InputOccupied {
                    node: n.name().into(),
                    idx: 0,
                });
            }
            n.inputs[0] = Some(src);
            n.outputs[0].push(dst);
        }
        for peer in &mut self.try_node_mut(src.node)?.outputs[src.idx] {
            if *peer == dst {
                *peer = node.in_(0)
            }
        }
        self.try_node_mut(dst.node)?.inputs[dst.idx] = Some(node.out(0));
        Ok(())
    }

    pub fn add_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        self.try_node(dst)?;
        let src_node = self.try_node_mut(src)?;
        if src_node.out_ctrl.contains(&dst) {
            return Ok(());
        }
        src_node.out_ctrl.push(dst);
        self.try_node_mut(dst)?.in_ctrl.push(src);
        Ok(())
    }

    /// 把 `from` 的入控制边复制到 `to`
    pub fn copy_in_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        for src in self.try_node(from)?.in_ctrl.clone() {
            if src != to {
                self.add_ctrl_edge(src, to)?
            }
        }
        Ok(())
    }

    /// 把 `from` 的出控制边复制到 `to`
    pub fn copy_out_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        for dst in self.try_node(from)?.out_ctrl.clone() {
            if dst != to {
                self.add_ctrl_edge(to, dst)?
            }
        }
        Ok(())
    }

    /// 断开节点的所有边。
    ///
    /// `relink[i] = j` 表示第 `j` 个输入的对端直接连接到第 `i` 个输出的所有对端；
    /// 入控制边的源节点连接到所有后继，数据前驱连接到控制后继。
    pub fn isolate(&mut self, id: NodeId, relink: &[usize]) -> Result<(), GraphError> {
        let node = self.try_node(id)?;
        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();
        let in_ctrl = node.in_ctrl.clone();
        let out_ctrl = node.out_ctrl.clone();

        for (i, peers) in outputs.iter().enumerate() {
            for &dst in peers {
                self.remove_edge(id.out(i), dst)?
            }
        }
        for (j, src) in inputs.iter().enumerate() {
            if let &Some(src) = src {
                self.remove_edge(src, id.in_(j))?
            }
        }
        for &src in &in_ctrl {
            self.remove_ctrl_edge(src, id)?
        }
        for &dst in &out_ctrl {
            self.remove_ctrl_edge(id, dst)?
        }

        for (i, &j) in relink.iter().enumerate() {
            let Some(Some(src)) = inputs.get(j).copied() else {
                continue;
            };
            for &dst in outputs.get(i).map_or(&[][..], Vec::as_slice) {
                debug!("relink {:?} -> {:?}", src, dst);
                self.add_edge(src, dst)?
            }
        }

        let successors = outputs
            .iter()
            .flatten()
            .map(|a| a.node)
            .chain(out_ctrl.iter().copied())
            .collect::<Vec<_>>();
        for &src in &in_ctrl {
            for &dst in &successors {
                if src != dst {
                    self.add_ctrl_edge(src, dst)?
                }
            }
        }
        for src in inputs.iter().flatten().map(|a| a.node) {
            for &dst in &out_ctrl {
                if src != dst {
                    self.add_ctrl_edge(src, dst)?
                }
            }
        }
        Ok(())
    }

    /// 断开节点所有边后将其从图中删除，不重连前后节点
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.isolate(id, &[])?;
        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(GraphError::NodeNotFound(id.0))?;
        self.names.remove(node.name());
        if let Some(sub) = self.graphs.get_mut(node.owner.0) {
            sub.nodes.retain(|&n| n != id)
        }
        Ok(())
    }

    fn remove_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        self.try_node_mut(src)?.out_ctrl.retain(|&n| n != dst);
        self.try_node_mut(dst)?.in_ctrl.retain(|&n| n != src);
        Ok(())
    }

    fn edge_not_found(&self, src: NodeId, dst: NodeId) -> GraphError {
        let name = |id: NodeId| {
            self.node(id)
                .map_or_else(|| format!("#{}", id.0), |n| n.name().into())
        };
        GraphError::EdgeNotFound {
            src: name(src),
            dst: name(dst),
        }
    }
}

fn check_in(node: &Node, idx: usize) -> Result<(), GraphError> {
    if idx < node.inputs.len() {
        Ok(())
    } else {
        Err(GraphError::AnchorOutOfRange {
            node: node.name().into(),
            dir: "input",
            idx,
        })
    }
}

fn check_out(node: &Node, idx: usize) -> Result<(), GraphError> {
    if idx < node.outputs.len() {
        Ok(())
    } else {
        Err(GraphError::AnchorOutOfRange {
            node: node.name().into(),
            dir: "output",
            idx,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{ComputeGraph, GraphError, GraphId, NodeId, OpDesc, ty};
    use digit_layout::types as dt;
    use tensor::TensorDesc;

    fn op(g: &mut ComputeGraph, name: &str, ty: &str, n_in: usize, n_out: usize) -> NodeId {
        let desc = TensorDesc::new(dt::F32, [4]);
        let mut op = OpDesc::new(name, ty);
        for i in 0..n_in {
            op = op.input(format!("x{i}"), desc.clone())
        }
        for i in 0..n_out {
            op = op.output(format!("y{i}"), desc.clone())
        }
        g.add_node(GraphId::ROOT, op).unwrap()
    }

    #[test]
    fn test_edges() {
        let mut g = ComputeGraph::new("root");
        let a = op(&mut g, "a", "Add", 0, 1);
        let b = op(&mut g, "b", "Mul", 2, 1);

        g.add_edge(a.out(0), b.in_(0)).unwrap();
        g.add_edge(a.out(0), b.in_(1)).unwrap();
        assert!(matches!(
            g.add_edge(a.out(0), b.in_(1)),
            Err(GraphError::InputOccupied { idx: 1, .. })
        ));
        assert!(matches!(
            g.add_edge(a.out(1), b.in_(0)),
            Err(GraphError::AnchorOutOfRange { idx: 1, .. })
        ));
        assert_eq!(g.out_peers(a.out(0)), [b.in_(0), b.in_(1)]);
        assert_eq!(g.out_data_nodes(a), [b, b]);
        assert_eq!(g.in_data_nodes(b), [a, a]);

        g.remove_edge(a.out(0), b.in_(0)).unwrap();
        assert_eq!(g.in_peer(b.in_(0)), None);
        assert_eq!(g.out_peers(a.out(0)), [b.in_(1)]);
    }

    #[test]
    fn test_insert_and_isolate() {
        let mut g = ComputeGraph::new("root");
        let a = op(&mut g, "a", "Add", 0, 1);
        let b = op(&mut g, "b", "Mul", 1, 0);
        let c = op(&mut g, "c", "Neg", 1, 0);
        let ctrl = op(&mut g, "ctrl", "NoOp", 0, 0);
        let id = op(&mut g, "a_Identity0", ty::IDENTITY, 1, 1);

        g.add_edge(a.out(0), b.in_(0)).unwrap();
        g.add_edge(a.out(0), c.in_(0)).unwrap();
        g.insert_between(a.out(0), b.in_(0), id).unwrap();
        assert_eq!(g.out_peers(a.out(0)), [id.in_(0), c.in_(0)]);
        assert_eq!(g.in_peer(b.in_(0)), Some(id.out(0)));

        g.add_ctrl_edge(ctrl, id).unwrap();
        g.isolate(id, &[0]).unwrap();
        assert_eq!(g.out_peers(a.out(0)), [c.in_(0), b.in_(0)]);
        assert_eq!(g.node(b).unwrap().in_ctrl(), [ctrl]);
        assert!(g.node(id).unwrap().in_ctrl().is_empty());

        g.remove_node(id).unwrap();
        assert!(!g.contains(id));
        assert_eq!(g.find_node("a_Identity0"), None);
        assert_eq!(g.direct_nodes(GraphId::ROOT), [a, b, c, ctrl]);
    }

    #[test]
    fn test_topo() {
        let mut g = ComputeGraph::new("root");
        let c = op(&mut g, "c", "Neg", 1, 1);
        let b = op(&mut g, "b", "Relu", 1, 1);
        let a = op(&mut g, "a", "Add", 0, 1);
        let d = op(&mut g, "d", "NoOp", 0, 0);
        g.add_edge(a.out(0), b.in_(0)).unwrap();
        g.add_edge(b.out(0), c.in_(0)).unwrap();
        g.add_ctrl_edge(c, d).unwrap();
        assert_eq!(g.topo_nodes().unwrap(), [a, b, c, d]);

        g.add_ctrl_edge(d, a).unwrap();
        assert_eq!(g.topo_nodes(), Err(GraphError::Cyclic("root".into())));
    }

    #[test]
    fn test_copy_ctrl() {
        let mut g = ComputeGraph::new("root");
        let p = op(&mut g, "p", "NoOp", 0, 0);
        let q = op(&mut g, "q", "NoOp", 0, 0);
        let x = op(&mut g, "x", "NoOp", 0, 0);
        let y = op(&mut g, "y", "NoOp", 0, 0);
        g.add_ctrl_edge(p, x).unwrap();
        g.add_ctrl_edge(x, q).unwrap();

        g.copy_in_ctrl_edges(x, y).unwrap();
        g.copy_out_ctrl_edges(x, y).unwrap();
        assert_eq!(g.node(y).unwrap().in_ctrl(), [p]);
        assert_eq!(g.node(y).unwrap().out_ctrl(), [q]);
        g.add_ctrl_edge(p, y).unwrap();
        assert_eq!(g.node(p).unwrap().out_ctrl(), [x, y]);
    }
}
