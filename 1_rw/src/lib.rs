//! 子图边界的内存读写冲突分析与消解。
//!
//! 按算子语义把每个锚点标记为只读、可写等读写类型，
//! 在产生冲突的数据边上插入 Identity 以隔离存储，并移除多余的 Identity。

mod classify;
mod conflict;
mod error;
mod rewrite;
mod rw_type;
mod subgraph;

use graph::{ComputeGraph, NodeId, OpRole};
use log::{info, warn};
use rewrite::{
    handle_allreduce_duplicate_input, insert_identity, insert_identity_as_needed,
    remove_no_use_identity, split_identity,
};
use subgraph::mark_rw_type_for_all_subgraphs;

pub use classify::RwContext;
pub use conflict::{ConflictResult, conflict_between};
pub use error::RwError;
pub use rw_type::{InputRwType, OutputRwType};

/// 改写轮数上限
const MAX_ROUNDS: usize = 64;

/// 消解图中的内存读写冲突，重复执行不会再改变图。
pub fn handle_memory_rw_conflict(graph: &mut ComputeGraph) -> Result<(), RwError> {
    if !graph.has_subgraphs() {
        info!(
            "graph {} has no subgraph, handle duplicate inputs of allreduce only",
            graph.name()
        );
        handle_allreduce_duplicate_input(graph)?;
        return Ok(());
    }

    let mut ctx = RwContext::new();
    for (src, dst) in mark_rw_type_for_all_subgraphs(&mut ctx, graph) {
        insert_identity(graph, src, dst)?;
    }

    for round in 0..MAX_ROUNDS {
        if !resolve_round(&ctx, graph)? {
            info!("memory rw conflict of {} resolved in {round} rounds", graph.name());
            return Ok(());
        }
    }
    Err(RwError::NotConverged(MAX_ROUNDS))
}

/// 检查图中是否存在无法消解的读写冲突，不修改图
pub fn check_rw_conflict(graph: &ComputeGraph) -> bool {
    if !graph.has_subgraphs() {
        return false;
    }

    let mut ctx = RwContext::new();
    // 只检查，不需要插入隔离
    let _ = mark_rw_type_for_all_subgraphs(&mut ctx, graph);

    for id in graph.all_nodes() {
        let Some(node) = graph.node(id) else { continue };
        if node.role() == OpRole::While || in_while_body(graph, id) {
            continue;
        }
        for idx in 0..node.n_outputs() {
            let src = id.out(idx);
            let peers = graph.out_peers(src);
            if peers.is_empty() {
                continue;
            }
            let output = ctx.output_rw_type(graph, src);
            for &dst in peers {
                let Some(peer) = graph.node(dst.node) else {
                    continue;
                };
                if peer.role() == OpRole::While {
                    continue;
                }
                let input = ctx.input_rw_type(graph, dst);
                if conflict_between(output, input) == ConflictResult::WrongGraph {
                    warn!(
                        "output {idx} of {} is {output}, input {} of {} is {input}, rw conflict",
                        node.name(),
                        dst.idx,
                        peer.name()
                    );
                    return true;
                }
            }
        }
    }
    false
}

fn resolve_round(ctx: &RwContext, graph: &mut ComputeGraph) -> Result<bool, RwError> {
    let mut changed = false;
    for id in graph.all_nodes() {
        let Some(node) = graph.node(id) else { continue };
        let role = node.role();
        if in_while_body(graph, id) || graph.is_subgraph_input(id) || graph.is_subgraph_output(id)
        {
            continue;
        }

        if role.is_copy() {
            changed |= split_identity(ctx, graph, id)?;
            if graph.contains(id) {
                changed |= remove_no_use_identity(ctx, graph, id)?;
            }
        }
        if graph.contains(id) {
            changed |= insert_identity_as_needed(ctx, graph, id)?;
        }
    }
    Ok(changed)
}

/// 节点直接位于 While 的子图中
fn in_while_body(graph: &ComputeGraph, id: NodeId) -> bool {
    graph
        .node(id)
        .and_then(|n| graph.parent_node(n.owner()))
        .and_then(|p| graph.node(p))
        .is_some_and(|p| p.role() == OpRole::While)
}

#[cfg(test)]
mod test {
    use super::{check_rw_conflict, handle_memory_rw_conflict};
    use crate::{InputRwType, OutputRwType, RwError};
    use digit_layout::types as dt;
    use graph::{ComputeGraph, GraphId, NodeId, OpDesc, OpRole, attr, ty};
    use tensor::TensorDesc;

    const ROOT: GraphId = GraphId::ROOT;

    fn desc() -> TensorDesc {
        TensorDesc::new(dt::F32, [32, 16])
    }

    fn source(g: &mut ComputeGraph, graph: GraphId, name: &str, ty: &str) -> NodeId {
        g.add_node(graph, OpDesc::new(name, ty).output("y", desc()))
            .unwrap()
    }

    fn unary(g: &mut ComputeGraph, graph: GraphId, name: &str, ty: &str) -> NodeId {
        g.add_node(
            graph,
            OpDesc::new(name, ty).input("x", desc()).output("y", desc()),
        )
        .unwrap()
    }

    fn assign(g: &mut ComputeGraph, graph: GraphId, name: &str) -> NodeId {
        g.add_node(
            graph,
            OpDesc::new(name, "Assign")
                .input("ref", desc())
                .output("ref", desc()),
        )
        .unwrap()
    }

    fn data(g: &mut ComputeGraph, graph: GraphId, name: &str) -> NodeId {
        g.add_node(
            graph,
            OpDesc::new(name, ty::DATA)
                .attr(attr::PARENT_NODE_INDEX, 0i64)
                .output("y", desc()),
        )
        .unwrap()
    }

    fn net_output(g: &mut ComputeGraph, graph: GraphId, name: &str) -> NodeId {
        g.add_node(graph, OpDesc::new(name, ty::NET_OUTPUT).input("x", desc()))
            .unwrap()
    }

    /// 图中所有数据边，用于比较两次改写的结果
    fn edges(g: &ComputeGraph) -> Vec<String> {
        let mut ans = Vec::new();
        for id in g.all_nodes() {
            let node = g.node(id).unwrap();
            for idx in 0..node.n_inputs() {
                if let Some(src) = g.in_peer(id.in_(idx)) {
                    let src_name = g.node(src.node).unwrap().name();
                    ans.push(format!("{src_name}:{} -> {}:{idx}", src.idx, node.name()))
                }
            }
        }
        ans.sort();
        ans
    }

    fn peer(g: &ComputeGraph, id: NodeId) -> &graph::Node {
        g.node(g.in_peer(id.in_(0)).unwrap().node).unwrap()
    }

    #[test]
    fn test_allreduce_without_subgraph() {
        let mut g = ComputeGraph::new("root");
        let x = source(&mut g, ROOT, "x", "Relu");
        let ar = g
            .add_node(
                ROOT,
                OpDesc::new("ar", ty::HCOM_ALL_REDUCE)
                    .input("x0", desc())
                    .input("x1", desc())
                    .output("y", desc()),
            )
            .unwrap();
        g.add_edge(x.out(0), ar.in_(0)).unwrap();
        g.add_edge(x.out(0), ar.in_(1)).unwrap();

        assert!(!check_rw_conflict(&g));
        handle_memory_rw_conflict(&mut g).unwrap();
        assert_eq!(g.in_peer(ar.in_(0)), Some(x.out(0)));
        let copy = g.in_peer(ar.in_(1)).unwrap().node;
        assert_eq!(g.node(copy).unwrap().name(), "x_Identity0");

        let before = edges(&g);
        handle_memory_rw_conflict(&mut g).unwrap();
        assert_eq!(edges(&g), before);
    }

    #[test]
    fn test_idempotent() {
        let _ = env_logger::builder().is_test(true).try_init();

        // v -> if { then: data -> assign -> netoutput; else: data -> neg -> netoutput } -> a
        // p -> i -> { w, r }
        let mut g = ComputeGraph::new("root");
        let v = source(&mut g, ROOT, "v", ty::VARIABLE);
        let if_ = unary(&mut g, ROOT, "if", ty::IF);
        let a = unary(&mut g, ROOT, "a", "Neg");
        let p = source(&mut g, ROOT, "p", "Relu");
        let i = unary(&mut g, ROOT, "i", ty::IDENTITY);
        let w = assign(&mut g, ROOT, "w");
        let r = unary(&mut g, ROOT, "r", "Neg");
        g.add_edge(v.out(0), if_.in_(0)).unwrap();
        g.add_edge(if_.out(0), a.in_(0)).unwrap();
        g.add_edge(p.out(0), i.in_(0)).unwrap();
        g.add_edge(i.out(0), w.in_(0)).unwrap();
        g.add_edge(i.out(0), r.in_(0)).unwrap();

        let then = g.add_subgraph(if_, "then").unwrap();
        let t_data = data(&mut g, then, "t_data");
        let t_assign = assign(&mut g, then, "t_assign");
        let t_out = net_output(&mut g, then, "t_out");
        g.add_edge(t_data.out(0), t_assign.in_(0)).unwrap();
        g.add_edge(t_assign.out(0), t_out.in_(0)).unwrap();

        let else_ = g.add_subgraph(if_, "else").unwrap();
        let e_data = data(&mut g, else_, "e_data");
        let e_neg = unary(&mut g, else_, "e_neg", "Neg");
        let e_out = net_output(&mut g, else_, "e_out");
        g.add_edge(e_data.out(0), e_neg.in_(0)).unwrap();
        g.add_edge(e_neg.out(0), e_out.in_(0)).unwrap();

        assert!(!check_rw_conflict(&g));
        handle_memory_rw_conflict(&mut g).unwrap();

        // 子图中的写入结果经 Identity 输出
        assert_eq!(peer(&g, t_out).role(), OpRole::Identity);
        assert_eq!(peer(&g, t_out).name(), "t_assign_Identity0");
        // 变量写入分支，直连
        assert_eq!(g.in_peer(if_.in_(0)), Some(v.out(0)));
        // 共享的 Identity 被拆分
        assert!(!g.contains(i));
        assert_eq!(peer(&g, w).role(), OpRole::Identity);
        assert_eq!(g.in_peer(peer_id(&g, w).in_(0)), Some(p.out(0)));
        assert_eq!(g.in_peer(r.in_(0)), Some(p.out(0)));

        let before = edges(&g);
        let n_nodes = g.all_nodes().len();
        handle_memory_rw_conflict(&mut g).unwrap();
        assert_eq!(edges(&g), before);
        assert_eq!(g.all_nodes().len(), n_nodes);
        assert!(!check_rw_conflict(&g));
    }

    fn peer_id(g: &ComputeGraph, id: NodeId) -> NodeId {
        g.in_peer(id.in_(0)).unwrap().node
    }

    #[test]
    fn test_wrong_graph() {
        // 同一个输入在一个分支中被写入，在另一个分支中被集合通信改写
        let mut g = ComputeGraph::new("root");
        let v = source(&mut g, ROOT, "v", ty::VARIABLE);
        let if_ = unary(&mut g, ROOT, "if", ty::IF);
        g.add_edge(v.out(0), if_.in_(0)).unwrap();

        let then = g.add_subgraph(if_, "then").unwrap();
        let t_data = data(&mut g, then, "t_data");
        let t_assign = assign(&mut g, then, "t_assign");
        g.add_edge(t_data.out(0), t_assign.in_(0)).unwrap();

        let else_ = g.add_subgraph(if_, "else").unwrap();
        let e_data = data(&mut g, else_, "e_data");
        let e_ar = unary(&mut g, else_, "e_ar", ty::HCOM_ALL_REDUCE);
        g.add_edge(e_data.out(0), e_ar.in_(0)).unwrap();

        assert!(check_rw_conflict(&g));
        assert_eq!(
            handle_memory_rw_conflict(&mut g),
            Err(RwError::WrongGraph {
                node: "v".into(),
                out_idx: 0,
                peer: "if".into(),
                in_idx: 0,
                output: OutputRwType::Writeable,
                input: InputRwType::Invalid,
            })
        );
    }

    #[test]
    fn test_while() {
        let mut g = ComputeGraph::new("root");
        let v = source(&mut g, ROOT, "v", ty::VARIABLE);
        let w = unary(&mut g, ROOT, "w", ty::WHILE);
        let a = unary(&mut g, ROOT, "a", "Neg");
        g.add_edge(v.out(0), w.in_(0)).unwrap();
        g.add_edge(w.out(0), a.in_(0)).unwrap();

        let body = g.add_subgraph(w, "body").unwrap();
        let b_data = data(&mut g, body, "b_data");
        let b_assign = assign(&mut g, body, "b_assign");
        let b_out = net_output(&mut g, body, "b_out");
        g.add_edge(b_data.out(0), b_assign.in_(0)).unwrap();
        g.add_edge(b_assign.out(0), b_out.in_(0)).unwrap();

        assert!(!check_rw_conflict(&g));
        handle_memory_rw_conflict(&mut g).unwrap();

        assert_eq!(peer(&g, w).name(), "v_Identity0");
        assert_eq!(g.in_peer(a.in_(0)), Some(w.out(0)));
        assert_eq!(g.in_peer(b_assign.in_(0)), Some(b_data.out(0)));
        assert_eq!(g.in_peer(b_out.in_(0)), Some(b_assign.out(0)));

        let before = edges(&g);
        handle_memory_rw_conflict(&mut g).unwrap();
        assert_eq!(edges(&g), before);
    }
}
