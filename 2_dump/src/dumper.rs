use crate::{
    DumpError, DumpMode, DumpProperties, encode,
    dump_ref::{RefDir, parse_dump_ref},
    exception::OpDescInfo,
    proto::{BufferType, Op, OpBuffer, OpMappingInfo, Output, Task},
};
use exec::{ADDR_LEN, DevPtr, Device, Exec, ExecError, Memcpy};
use graph::{ComputeGraph, NodeId, OpDesc, attr};
use log::{debug, error, info, warn};
use prost::Message;
use std::collections::HashMap;
use tensor::{Format, Shape, digit_layout::types};

/// 设备侧的 L1 存储类型
pub const MEMORY_L1: i64 = 1 << 16;

const LOAD_FLAG: u32 = 1;
const UNLOAD_FLAG: u32 = 0;

const END_GRAPH_NAME: &str = "Node_Output";
const END_GRAPH_TYPE: &str = "EndGraph";
const OP_DEBUG_NAME: &str = "Node_OpDebug";
const OP_DEBUG_TYPE: &str = "Opdebug";
const OP_DEBUG_SIZE: usize = 2048;

/// 一个等待编码的 dump 任务
struct SavedOp {
    task_id: u32,
    stream_id: u32,
    op: OpDesc,
    /// 参数块的起始地址
    args: DevPtr,
    kind: SavedKind,
}

enum SavedKind {
    /// 有任务的算子，记录实际的输入输出地址数
    Task { n_inputs: usize, n_outputs: usize },
    /// 通过消费者的输入 dump 的 Data 节点
    Data {
        input_index: usize,
        output_index: usize,
        shape: Shape,
        size: u64,
    },
}

/// Data 节点的一个消费者输入
struct InputMapping {
    data: NodeId,
    input_index: usize,
    output_index: usize,
}

/// 收集调度的任务，编码为 dump 描述并加载到设备
pub struct DataDumper<'d, D: Device> {
    device: &'d D,
    graph: &'d ComputeGraph,
    properties: DumpProperties,

    model_name: String,
    om_name: String,
    model_id: u32,
    device_id: u32,

    step_id_addr: u64,
    iterations_per_loop_addr: u64,
    loop_cond_addr: u64,

    ops: Vec<SavedOp>,
    ref_info: HashMap<String, DevPtr>,
    input_map: HashMap<String, Vec<InputMapping>>,
    pub(crate) op_desc_info: Vec<OpDescInfo>,

    end_graph: Option<(u32, u32)>,
    op_debug: Option<(u32, u32, DevPtr)>,
    l1_fusion_addr: DevPtr,

    load_flag: bool,
    load_mem: Option<DevPtr>,
    unload_mem: Option<DevPtr>,
}

impl<'d, D: Device> DataDumper<'d, D> {
    pub fn new(device: &'d D, graph: &'d ComputeGraph, properties: DumpProperties) -> Self {
        Self {
            device,
            graph,
            properties,
            model_name: graph.name().into(),
            om_name: String::new(),
            model_id: 0,
            device_id: 0,
            step_id_addr: 0,
            iterations_per_loop_addr: 0,
            loop_cond_addr: 0,
            ops: Vec::new(),
            ref_info: HashMap::new(),
            input_map: HashMap::new(),
            op_desc_info: Vec::new(),
            end_graph: None,
            op_debug: None,
            l1_fusion_addr: DevPtr::NULL,
            load_flag: false,
            load_mem: None,
            unload_mem: None,
        }
    }

    pub fn with_model(mut self, name: impl Into<String>, om_name: impl Into<String>, id: u32) -> Self {
        self.model_name = name.into();
        self.om_name = om_name.into();
        self.model_id = id;
        self
    }

    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    pub const fn device(&self) -> &'d D {
        self.device
    }

    pub const fn properties(&self) -> &DumpProperties {
        &self.properties
    }

    pub const fn is_loaded(&self) -> bool {
        self.load_flag
    }

    pub fn set_loop_addr(&mut self, step_id: DevPtr, iterations_per_loop: DevPtr, loop_cond: DevPtr) {
        self.step_id_addr = step_id.addr();
        self.iterations_per_loop_addr = iterations_per_loop.addr();
        self.loop_cond_addr = loop_cond.addr()
    }

    pub fn set_l1_fusion_addr(&mut self, addr: DevPtr) {
        self.l1_fusion_addr = addr
    }

    pub fn save_end_graph_id(&mut self, task_id: u32, stream_id: u32) {
        self.end_graph = Some((task_id, stream_id))
    }

    pub fn save_op_debug_id(&mut self, task_id: u32, stream_id: u32, addr: DevPtr, is_op_debug: bool) {
        self.op_debug = is_op_debug.then_some((task_id, stream_id, addr))
    }

    /// 记录 Data 节点的所有消费者，这些消费者的任务保存时一并 dump Data 的输出
    pub fn save_dump_input(&mut self, data: NodeId) -> Result<(), DumpError> {
        let graph = self.graph;
        let node = graph
            .node(data)
            .ok_or_else(|| DumpError::InvalidParameter(format!("data node {data:?} not found")))?;
        info!("save data {} message", node.name());
        for output_index in 0..node.n_outputs() {
            for dst in graph.out_peers(data.out(output_index)) {
                let Some(consumer) = graph.node(dst.node) else {
                    continue;
                };
                self.input_map
                    .entry(consumer.name().into())
                    .or_default()
                    .push(InputMapping {
                        data,
                        input_index: dst.idx,
                        output_index,
                    })
            }
        }
        Ok(())
    }

    /// 保存一个已调度的任务，`args` 是其参数块的起始地址
    pub fn save_dump_task(&mut self, exec: &Exec<DevPtr>, args: DevPtr) -> Result<(), DumpError> {
        let op = &exec.node;
        info!(
            "save dump task {}, task id: {}, stream id: {}",
            op.name(),
            exec.task_id,
            exec.stream_id
        );
        self.ops.push(SavedOp {
            task_id: exec.task_id,
            stream_id: exec.stream_id,
            op: op.clone(),
            args,
            kind: SavedKind::Task {
                n_inputs: exec.inputs.len(),
                n_outputs: exec.outputs.len(),
            },
        });
        self.ref_info.insert(op.name().into(), args);

        let Some(mappings) = self.input_map.get(op.name()) else {
            return Ok(());
        };
        for mapping in mappings {
            let data = self.graph.node(mapping.data).ok_or_else(|| {
                DumpError::InvalidParameter(format!("data node of {} not found", op.name()))
            })?;
            let desc = op.input_desc(mapping.input_index).ok_or_else(|| {
                DumpError::InvalidParameter(format!(
                    "input {} of {} not found, it has {} inputs",
                    mapping.input_index,
                    op.name(),
                    op.inputs().len()
                ))
            })?;
            let size = encode::tensor_size(op.name(), desc)?;
            info!(
                "save input dump task {}, task id: {}, stream id: {}, data size: {size}",
                data.name(),
                exec.task_id,
                exec.stream_id
            );
            self.ops.push(SavedOp {
                task_id: exec.task_id,
                stream_id: exec.stream_id,
                op: data.desc().clone(),
                args,
                kind: SavedKind::Data {
                    input_index: mapping.input_index,
                    output_index: mapping.output_index,
                    shape: desc.shape().clone(),
                    size,
                },
            })
        }
        Ok(())
    }

    /// 编码所有保存的任务并加载到设备
    pub fn load_dump_info(&mut self) -> Result<(), DumpError> {
        let model_name = self.dump_list_key();
        if self.ops.is_empty() {
            warn!("no op saved to dump");
        }

        let mut info = OpMappingInfo {
            dump_path: format!("{}{}/", self.properties.path(), self.device_id),
            model_name: Some(model_name),
            model_id: Some(self.model_id),
            step_id_addr: non_zero(self.step_id_addr),
            iterations_per_loop_addr: non_zero(self.iterations_per_loop_addr),
            loop_cond_addr: non_zero(self.loop_cond_addr),
            flag: LOAD_FLAG,
            task: Vec::with_capacity(self.ops.len() + 2),
            dump_step: self.properties.step().into(),
        };
        info!(
            "dump step is {} and dump path is {} in load dump info",
            info.dump_step, info.dump_path
        );
        for op in &self.ops {
            let task = self
                .build_task(op)
                .inspect_err(|e| error!("build task info failed: {e}"))?;
            info.task.push(task)
        }
        if let Some((task_id, stream_id)) = self.end_graph {
            info!("add end graph task {task_id} on stream {stream_id}");
            info.task.push(Task {
                task_id,
                stream_id,
                op: Some(op(END_GRAPH_NAME, END_GRAPH_TYPE)),
                end_graph: true,
                ..Default::default()
            })
        }
        if let Some((task_id, stream_id, addr)) = self.op_debug {
            info!("add op debug task {task_id} on stream {stream_id}");
            info.task.push(op_debug_task(task_id, stream_id, addr))
        }

        if info.task.is_empty() {
            return Ok(());
        }
        push_to_device(self.device, &info, &mut self.load_mem)?;
        self.load_flag = true;
        info!("load dump info success");
        Ok(())
    }

    /// 通知设备卸载 dump 描述，没有加载过时直接返回
    pub fn unload_dump_info(&mut self) -> Result<(), DumpError> {
        if !self.load_flag {
            info!("no need to unload dump info");
            return Ok(());
        }

        let info = OpMappingInfo {
            model_id: Some(self.model_id),
            flag: UNLOAD_FLAG,
            task: self
                .ops
                .iter()
                .map(|op| Task {
                    task_id: op.task_id,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        push_to_device(self.device, &info, &mut self.unload_mem)?;
        self.load_flag = false;
        info!("unload dump info success");
        Ok(())
    }

    /// 设备协议中的模型名：已注册 om 名时用 om 名，否则用模型名
    fn dump_list_key(&self) -> String {
        let props = &self.properties;
        let key = if props.contains_model(&self.om_name) {
            &self.om_name
        } else {
            &self.model_name
        };
        info!("{} op need dump in model {key}", self.ops.len());

        if !props.contains_model(crate::ALL_MODEL_NEED_DUMP)
            && !props.contains_model(&self.om_name)
            && !props.contains_model(&self.model_name)
        {
            let list = props.models().collect::<Vec<_>>().join(", ");
            warn!("model {key} will not be dumped, dump list: [{list}]");
        } else if let Some(layers) = props.layers(key) {
            for layer in layers {
                if !self.ops.iter().any(|op| op.op.name() == layer) {
                    warn!("op {layer} set to dump but not exist in model {key}");
                }
            }
        }
        key.clone()
    }

    fn build_task(&self, saved: &SavedOp) -> Result<Task, DumpError> {
        debug!("op {} begin to add task in op mapping info", saved.op.name());
        let mut task = Task {
            task_id: saved.task_id,
            stream_id: saved.stream_id,
            op: Some(op(saved.op.name(), saved.op.ty())),
            ..Default::default()
        };
        let is_task = matches!(saved.kind, SavedKind::Task { .. });
        match self.properties.mode() {
            DumpMode::Output => self.dump_output(saved, &mut task)?,
            DumpMode::Input => {
                if is_task {
                    self.dump_input(saved, &mut task)?
                }
            }
            DumpMode::All => {
                self.dump_output(saved, &mut task)?;
                if is_task {
                    self.dump_input(saved, &mut task)?
                }
            }
        }
        Ok(task)
    }

    fn dump_output(&self, saved: &SavedOp, task: &mut Task) -> Result<(), DumpError> {
        let op = &saved.op;
        match saved.kind {
            SavedKind::Task { n_outputs, .. } => {
                let descs = op.outputs();
                if descs.len() != n_outputs {
                    return Err(DumpError::ShapeOrSizeMismatch(format!(
                        "{} has {} output descs but {n_outputs} output addrs",
                        op.name(),
                        descs.len()
                    )));
                }
                let mem_types = mem_types(op, attr::OUTPUT_MEM_TYPE_LIST, descs.len())?;
                let n_inputs = op.inputs().len();
                for (i, port) in descs.iter().enumerate() {
                    if let Some(dump_ref) = port.desc.dump_ref() {
                        task.output.push(self.ref_output(op, i, dump_ref)?)
                    } else if is_l1(mem_types.as_deref(), i) {
                        info!("output {i} of {} is l1 addr", op.name());
                        let size = encode::tensor_size(op.name(), &port.desc)?;
                        task.buffer.push(self.op_buffer(size))
                    } else {
                        let addr = arg_addr(saved.args, i + n_inputs);
                        task.output.push(encode::output(op.name(), &port.desc, addr)?)
                    }
                }
            }
            SavedKind::Data {
                input_index,
                output_index,
                ref shape,
                size,
            } => {
                let desc = op.output_desc(output_index).ok_or_else(|| {
                    DumpError::InvalidParameter(format!(
                        "output {output_index} of {} not found",
                        op.name()
                    ))
                })?;
                // Data 的输出就是消费者的输入
                let addr = arg_addr(saved.args, input_index);
                task.output
                    .push(encode::output_with(desc, shape, size, addr))
            }
        }
        Ok(())
    }

    fn dump_input(&self, saved: &SavedOp, task: &mut Task) -> Result<(), DumpError> {
        let op = &saved.op;
        let SavedKind::Task { n_inputs, .. } = saved.kind else {
            return Ok(());
        };
        let descs = op.inputs();
        if descs.len() != n_inputs {
            return Err(DumpError::ShapeOrSizeMismatch(format!(
                "{} has {} input descs but {n_inputs} input addrs",
                op.name(),
                descs.len()
            )));
        }
        let mem_types = mem_types(op, attr::INPUT_MEM_TYPE_LIST, descs.len())?;
        for (i, port) in descs.iter().enumerate() {
            if let Some(dump_ref) = port.desc.dump_ref() {
                task.input.push(self.ref_input(op, i, dump_ref)?)
            } else if is_l1(mem_types.as_deref(), i) {
                info!("input {i} of {} is l1 addr", op.name());
                let size = encode::tensor_size(op.name(), &port.desc)?;
                task.buffer.push(self.op_buffer(size))
            } else {
                let addr = arg_addr(saved.args, i);
                task.input.push(encode::input(op.name(), &port.desc, addr)?)
            }
        }
        Ok(())
    }

    fn ref_output(&self, op: &OpDesc, i: usize, dump_ref: &str) -> Result<Output, DumpError> {
        let (target, desc, addr) = self.resolve_ref(op, "output", i, dump_ref)?;
        debug!("output {i} of {} is replaced by {dump_ref}", op.name());
        encode::output(target, desc, addr)
    }

    fn ref_input(
        &self,
        op: &OpDesc,
        i: usize,
        dump_ref: &str,
    ) -> Result<crate::proto::Input, DumpError> {
        let (target, desc, addr) = self.resolve_ref(op, "input", i, dump_ref)?;
        debug!("input {i} of {} is replaced by {dump_ref}", op.name());
        encode::input(target, desc, addr)
    }

    /// 找到重定向指向的算子描述和参数块地址
    fn resolve_ref<'a>(
        &'a self,
        op: &OpDesc,
        dir: &str,
        i: usize,
        dump_ref: &str,
    ) -> Result<(&'a str, &'a tensor::TensorDesc, DevPtr), DumpError> {
        let invalid = |reason: String| {
            error!("{dir} {i} of {}: {reason}", op.name());
            DumpError::InvalidParameter(format!(
                "{dir} {i} of {} with dump ref \"{dump_ref}\": {reason}",
                op.name()
            ))
        };

        let (name, ref_dir, index) =
            parse_dump_ref(dump_ref).ok_or_else(|| invalid("malformed".into()))?;
        let node = self
            .graph
            .find_node(name)
            .and_then(|id| self.graph.node(id))
            .ok_or_else(|| invalid(format!("redirect node {name} not found")))?;
        let base = *self
            .ref_info
            .get(name)
            .ok_or_else(|| invalid(format!("no saved task of redirect node {name}")))?;

        let target = node.desc();
        let (desc, slot) = match ref_dir {
            RefDir::Input => (target.input_desc(index), index),
            RefDir::Output => (target.output_desc(index), index + target.inputs().len()),
        };
        let desc = desc.ok_or_else(|| invalid(format!("index {index} out of range")))?;
        Ok((target.name(), desc, arg_addr(base, slot)))
    }

    fn op_buffer(&self, size: u64) -> OpBuffer {
        OpBuffer {
            buffer_type: BufferType::L1 as _,
            address: self.l1_fusion_addr.addr(),
            size,
        }
    }
}

impl<D: Device> Drop for DataDumper<'_, D> {
    fn drop(&mut self) {
        for ptr in [self.load_mem.take(), self.unload_mem.take()].into_iter().flatten() {
            self.device.free(ptr)
        }
    }
}

/// 序列化消息并交给设备，之前占用的设备存储先释放
fn push_to_device<D: Device>(
    device: &D,
    info: &OpMappingInfo,
    mem: &mut Option<DevPtr>,
) -> Result<(), DumpError> {
    let bytes = info.encode_to_vec();
    if bytes.is_empty() {
        error!("serialized op mapping info is empty");
        return Err(DumpError::Encode("op mapping info"));
    }

    if let Some(ptr) = mem.take() {
        warn!("device memory of dump info {ptr:?} has been used, release it");
        device.free(ptr)
    }
    let size = bytes.len();
    let ptr = device.alloc(size).ok_or(DumpError::OutOfMemory(size))?;
    *mem = Some(ptr);
    device
        .copy(Memcpy::HostToDevice { dst: ptr, src: &bytes })
        .map_err(ExecError::Rt)?;
    device.load_dump_info(ptr, size).map_err(ExecError::Rt)?;
    debug!("push {size} bytes of dump info to {ptr:?}");
    Ok(())
}

/// 参数块中第 `slot` 个地址的位置
fn arg_addr(args: DevPtr, slot: usize) -> DevPtr {
    args.offset((slot * ADDR_LEN) as _)
}

fn non_zero(addr: u64) -> Option<u64> {
    (addr != 0).then_some(addr)
}

fn op(name: &str, ty: &str) -> Op {
    Op {
        op_name: name.into(),
        op_type: ty.into(),
    }
}

/// 存储类型列表，存在时必须与张量一一对应
fn mem_types(op: &OpDesc, key: &str, n: usize) -> Result<Option<Vec<i64>>, DumpError> {
    let Some(types) = op.get_attr(key).and_then(|a| a.as_ints()) else {
        return Ok(None);
    };
    if types.len() != n {
        return Err(DumpError::ShapeOrSizeMismatch(format!(
            "{} has {n} tensors but {} memory types",
            op.name(),
            types.len()
        )));
    }
    Ok(Some(types))
}

fn is_l1(mem_types: Option<&[i64]>, i: usize) -> bool {
    mem_types.is_some_and(|types| types[i] == MEMORY_L1)
}

fn op_debug_task(task_id: u32, stream_id: u32, addr: DevPtr) -> Task {
    let u8_code = encode::dt_code(types::U8);
    let nd = Format::Nd.code();
    Task {
        task_id,
        stream_id,
        op: Some(op(OP_DEBUG_NAME, OP_DEBUG_TYPE)),
        output: vec![Output {
            data_type: u8_code,
            format: nd,
            shape: Some(encode::shape(&Shape::from([OP_DEBUG_SIZE]))),
            address: addr.addr(),
            original_name: OP_DEBUG_NAME.into(),
            original_output_index: 0,
            original_output_data_type: u8_code,
            original_output_format: nd,
            size: OP_DEBUG_SIZE as _,
            origin_shape: None,
        }],
        ..Default::default()
    }
}
