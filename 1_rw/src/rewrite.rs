use crate::{ConflictResult, InputRwType, RwContext, RwError, conflict_between};
use graph::{
    Collective, ComputeGraph, GraphError, GraphId, InAnchor, Node, NodeId, OpDesc, OpRole,
    OutAnchor, ty,
};
use log::{debug, info};
use std::collections::HashSet;

/// 在 `src` 之后创建一个 Identity 节点，描述与 `src` 的输出一致
fn create_identity_after(graph: &mut ComputeGraph, src: OutAnchor) -> Result<NodeId, RwError> {
    let node = graph.try_node(src.node)?;
    let owner = node.owner();
    let src_name = node.name().to_string();
    let Some(desc) = node.desc().output_desc(src.idx).cloned() else {
        return Err(GraphError::AnchorOutOfRange {
            node: src_name,
            dir: "output",
            idx: src.idx,
        }
        .into());
    };

    let name = graph.next_identity_name(&src_name);
    info!("insert new Identity node {name}");
    let op = OpDesc::new(name, ty::IDENTITY)
        .input("x", desc.clone())
        .output("y", desc);
    Ok(graph.add_node(owner, op)?)
}

/// 在数据边 `src -> dst` 上插入 Identity
pub(crate) fn insert_identity(
    graph: &mut ComputeGraph,
    src: OutAnchor,
    dst: InAnchor,
) -> Result<NodeId, RwError> {
    let identity = create_identity_after(graph, src)?;
    graph.insert_between(src, dst, identity)?;
    info!(
        "insert {} between {} and {}",
        name(graph, identity),
        name(graph, src.node),
        name(graph, dst.node)
    );
    Ok(identity)
}

/// 为节点每条需要隔离的输出边插入独立的 Identity
pub(crate) fn insert_identity_as_needed(
    ctx: &RwContext,
    graph: &mut ComputeGraph,
    id: NodeId,
) -> Result<bool, RwError> {
    let n_outputs = graph.try_node(id)?.n_outputs();
    let mut changed = false;
    for idx in 0..n_outputs {
        let src = id.out(idx);
        let output = ctx.output_rw_type(graph, src);
        for dst in graph.out_peers(src).to_vec() {
            // 消费者本身就是复制节点
            if graph.node(dst.node).is_some_and(|n| n.role().is_copy()) {
                continue;
            }
            let input = ctx.input_rw_type(graph, dst);
            debug!(
                "output {idx} of {} is {output}, input {} of {} is {input}",
                name(graph, id),
                dst.idx,
                name(graph, dst.node)
            );
            match conflict_between(output, input) {
                ConflictResult::DoNothing => {}
                ConflictResult::WrongGraph => {
                    return Err(RwError::WrongGraph {
                        node: name(graph, id).into(),
                        out_idx: idx,
                        peer: name(graph, dst.node).into(),
                        in_idx: dst.idx,
                        output,
                        input,
                    });
                }
                ConflictResult::InsertIdentity => {
                    insert_identity(graph, src, dst)?;
                    changed = true
                }
            }
        }
    }
    Ok(changed)
}

/// 拆分有多个消费者的 Identity：写入型消费者各自获得一个新的 Identity，其他消费者直连前驱
pub(crate) fn split_identity(
    ctx: &RwContext,
    graph: &mut ComputeGraph,
    id: NodeId,
) -> Result<bool, RwError> {
    let out = id.out(0);
    if graph.out_peers(out).len() <= 1 {
        return Ok(false);
    }
    let Some(pre) = graph.in_peer(id.in_(0)) else {
        return Ok(false);
    };

    for dst in graph.out_peers(out).to_vec() {
        let input = ctx.input_rw_type(graph, dst);
        if input == InputRwType::Invalid {
            return Err(RwError::WrongGraph {
                node: name(graph, id).into(),
                out_idx: 0,
                peer: name(graph, dst.node).into(),
                in_idx: dst.idx,
                output: ctx.output_rw_type(graph, out),
                input,
            });
        }

        graph.remove_edge(out, dst)?;
        match input {
            InputRwType::Writeable | InputRwType::ScopeWriteable => {
                let identity = create_identity_after(graph, pre)?;
                graph.add_edge(pre, identity.in_(0))?;
                graph.add_edge(identity.out(0), dst)?;
                graph.copy_in_ctrl_edges(dst.node, identity)?;
                info!(
                    "input {} of {} is {input}, insert {} after {}",
                    dst.idx,
                    name(graph, dst.node),
                    name(graph, identity),
                    name(graph, pre.node)
                )
            }
            _ => {
                graph.copy_in_ctrl_edges(id, dst.node)?;
                graph.copy_out_ctrl_edges(id, pre.node)?;
                graph.add_edge(pre, dst)?;
                info!(
                    "input {} of {} is {input}, link {} to it directly",
                    dst.idx,
                    name(graph, dst.node),
                    name(graph, pre.node)
                )
            }
        }
    }

    if graph.out_data_nodes_size(id) == 0 {
        info!("remove split identity {}", name(graph, id));
        graph.remove_node(id)?
    }
    Ok(true)
}

/// 删除不再需要的 Identity
pub(crate) fn remove_no_use_identity(
    ctx: &RwContext,
    graph: &mut ComputeGraph,
    id: NodeId,
) -> Result<bool, RwError> {
    let in_nodes = graph.in_data_nodes(id);
    if in_nodes.is_empty() || graph.out_data_nodes_size(id) > 1 {
        return Ok(false);
    }
    let out_nodes = graph.out_data_nodes(id);
    if out_nodes
        .first()
        .and_then(|&n| graph.node(n))
        .is_some_and(|n| n.role() == OpRole::StreamMerge)
    {
        return Ok(false);
    }
    if is_near_subgraph(graph, &in_nodes, &out_nodes) {
        return Ok(false);
    }
    let Some(pre) = graph.in_peer(id.in_(0)) else {
        return Ok(false);
    };

    let output = ctx.output_rw_type(graph, pre);
    let result = match graph.out_peers(id.out(0)).first() {
        Some(&dst) => conflict_between(output, ctx.input_rw_type(graph, dst)),
        None => ConflictResult::DoNothing,
    };
    if result != ConflictResult::DoNothing {
        return Ok(false);
    }

    info!(
        "output {} of {} is {output}, remove no use identity {}",
        pre.idx,
        name(graph, pre.node),
        name(graph, id)
    );
    graph.isolate(id, &[0])?;
    graph.remove_node(id)?;
    Ok(true)
}

/// 子图入口之后、子图出口之前，或与拥有子图的节点相邻
fn is_near_subgraph(graph: &ComputeGraph, in_nodes: &[NodeId], out_nodes: &[NodeId]) -> bool {
    let owns_subgraph = |id: NodeId| graph.node(id).is_some_and(Node::has_subgraphs);
    in_nodes
        .iter()
        .any(|&n| graph.is_subgraph_input(n) || owns_subgraph(n))
        || out_nodes
            .iter()
            .any(|&n| graph.is_subgraph_output(n) || owns_subgraph(n))
}

/// AllReduce 的多个输入来自同一个输出时，除第一个以外都插入 Identity
pub(crate) fn handle_allreduce_duplicate_input(graph: &mut ComputeGraph) -> Result<bool, RwError> {
    let mut changed = false;
    for id in graph.direct_nodes(GraphId::ROOT).to_vec() {
        let Some(node) = graph.node(id) else { continue };
        if node.role() != OpRole::Collective(Collective::AllReduce) {
            continue;
        }
        let mut seen = HashSet::new();
        for idx in 0..node.n_inputs() {
            let dst = id.in_(idx);
            let Some(src) = graph.in_peer(dst) else {
                continue;
            };
            if !seen.insert(src) {
                insert_identity(graph, src, dst)?;
                changed = true
            }
        }
    }
    Ok(changed)
}

fn name(graph: &ComputeGraph, id: NodeId) -> &str {
    graph.node(id).map_or("", Node::name)
}
