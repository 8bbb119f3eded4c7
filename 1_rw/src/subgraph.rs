use crate::{InputRwType, OutputRwType, RwContext};
use graph::{ComputeGraph, GraphId, InAnchor, OpRole, OutAnchor};
use log::debug;

/// 从内向外标记所有子图边界节点的读写类型。
///
/// 返回子图内需要插入 Identity 隔离的 NetOutput 输入边，由调用者决定是否改写。
/// While 的子图不参与标记。
pub(crate) fn mark_rw_type_for_all_subgraphs(
    ctx: &mut RwContext,
    graph: &ComputeGraph,
) -> Vec<(OutAnchor, InAnchor)> {
    let mut isolate = Vec::new();
    // 先序的逆序保证子图先于父图处理
    for sub in graph.all_subgraphs().into_iter().rev() {
        let Some(parent) = graph.parent_node(sub) else {
            debug!("subgraph without parent node, ignore it");
            continue;
        };
        if graph.node(parent).is_some_and(|n| n.role() == OpRole::While) {
            continue;
        }
        mark_rw_type_for_subgraph(ctx, graph, sub, &mut isolate)
    }
    isolate
}

fn mark_rw_type_for_subgraph(
    ctx: &mut RwContext,
    graph: &ComputeGraph,
    sub: GraphId,
    isolate: &mut Vec<(OutAnchor, InAnchor)>,
) {
    for &id in graph.direct_nodes(sub) {
        let Some(node) = graph.node(id) else { continue };
        match node.role() {
            OpRole::Data => {
                // Data 的输入读写类型由其所有消费者共同决定
                let ty = InputRwType::in_conflict(graph.out_peers(id.out(0)).iter().map(|&dst| {
                    let ty = ctx.input_rw_type(graph, dst);
                    debug!(
                        "input {} of {} is {ty}",
                        dst.idx,
                        graph.node(dst.node).map_or("", |n| n.name())
                    );
                    ty
                }));
                debug!("input rw type of {} is {ty}", node.name());
                ctx.record_input(node.name(), 0, ty)
            }
            OpRole::NetOutput => {
                for idx in 0..node.n_inputs() {
                    let dst = id.in_(idx);
                    if let Some(src) = graph.in_peer(dst) {
                        let ty = ctx.output_rw_type(graph, src);
                        debug!(
                            "output {} of {} is {ty}",
                            src.idx,
                            graph.node(src.node).map_or("", |n| n.name())
                        );
                        if ty == OutputRwType::Writeable {
                            isolate.push((src, dst))
                        }
                    }
                    // 可写输出隔离之后，子图输出对外总是独占的
                    ctx.record_output(node.name(), idx, OutputRwType::SoftRead)
                }
            }
            _ => {}
        }
    }
}
