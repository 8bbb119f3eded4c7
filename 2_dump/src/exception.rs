use crate::{
    DataDumper, DumpError, encode,
    proto::{DumpData, OpInput, OpOutput},
};
use exec::{DevPtr, Device, Exec, ExecError, Memcpy};
use graph::Port;
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tensor::{Format, Shape, digit_layout::DigitLayout};

const DUMP_DATA_VERSION: &str = "2.0";

/// 异常现场中的一个张量
#[derive(Clone, PartialEq, Debug)]
pub struct TensorInfo {
    pub dt: DigitLayout,
    pub format: Format,
    pub shape: Shape,
    pub size: u64,
    pub addr: DevPtr,
}

/// 为异常 dump 保存的算子信息
#[derive(Clone, PartialEq, Debug)]
pub struct OpDescInfo {
    pub op_name: String,
    pub op_type: String,
    pub task_id: u32,
    pub stream_id: u32,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
}

impl<D: Device> DataDumper<'_, D> {
    /// 保存算子信息，设备报告任务异常时据此导出现场
    pub fn save_op_desc_info(&mut self, exec: &Exec<DevPtr>) {
        let op = &exec.node;
        if op.inputs().len() != exec.inputs.len() || op.outputs().len() != exec.outputs.len() {
            warn!("tensors of {} do not match its addrs, skip it", op.name());
            return;
        }
        let inputs = tensors(op.inputs(), &exec.inputs);
        let outputs = tensors(op.outputs(), &exec.outputs);
        let (Some(inputs), Some(outputs)) = (inputs, outputs) else {
            warn!("size of a tensor of {} is unknown, skip it", op.name());
            return;
        };
        self.op_desc_info.push(OpDescInfo {
            op_name: op.name().into(),
            op_type: op.ty().into(),
            task_id: exec.task_id,
            stream_id: exec.stream_id,
            inputs,
            outputs,
        })
    }

    pub fn find_op_desc_info(&self, task_id: u32, stream_id: u32) -> Option<&OpDescInfo> {
        self.op_desc_info
            .iter()
            .find(|info| info.task_id == task_id && info.stream_id == stream_id)
    }

    /// 为每个出错的 `(task_id, stream_id)` 在 `dir` 下写一个现场文件。
    ///
    /// 文件内容依次为：头部长度（小端 u64）、[`DumpData`] 头部、所有输入的数据、所有输出的数据。
    pub fn dump_exception_info(
        &self,
        faults: &[(u32, u32)],
        dir: &Path,
    ) -> Result<Vec<PathBuf>, DumpError> {
        let mut files = Vec::with_capacity(faults.len());
        for &(task_id, stream_id) in faults {
            let info = self.find_op_desc_info(task_id, stream_id).ok_or_else(|| {
                DumpError::InvalidParameter(format!(
                    "no op saved for task {task_id} on stream {stream_id}"
                ))
            })?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_micros() as u64);

            let head = DumpData {
                version: DUMP_DATA_VERSION.into(),
                dump_time: now,
                output: info
                    .outputs
                    .iter()
                    .map(|t| OpOutput {
                        data_type: encode::dt_code(t.dt),
                        format: t.format.code(),
                        shape: Some(encode::shape(&t.shape)),
                        size: t.size,
                    })
                    .collect(),
                input: info
                    .inputs
                    .iter()
                    .map(|t| OpInput {
                        data_type: encode::dt_code(t.dt),
                        format: t.format.code(),
                        shape: Some(encode::shape(&t.shape)),
                        size: t.size,
                    })
                    .collect(),
                op_name: info.op_name.clone(),
            };
            let head = prost::Message::encode_to_vec(&head);

            let mut content = Vec::from((head.len() as u64).to_le_bytes());
            content.extend_from_slice(&head);
            for t in info.inputs.iter().chain(&info.outputs) {
                self.read_tensor(t, &mut content)?
            }

            let name = format!(
                "{}.{}.{task_id}.{now}",
                info.op_type.replace('/', "_"),
                info.op_name.replace('/', "_")
            );
            let path = dir.join(name);
            fs::write(&path, content)?;
            info!("dump exception of {} to {}", info.op_name, path.display());
            files.push(path)
        }
        Ok(files)
    }

    fn read_tensor(&self, t: &TensorInfo, content: &mut Vec<u8>) -> Result<(), DumpError> {
        if t.size == 0 {
            return Ok(());
        }
        let start = content.len();
        content.resize(start + t.size as usize, 0);
        self.device()
            .copy(Memcpy::DeviceToHost {
                dst: &mut content[start..],
                src: t.addr,
            })
            .map_err(ExecError::Rt)?;
        Ok(())
    }
}

fn tensors(ports: &[Port], addrs: &[DevPtr]) -> Option<Vec<TensorInfo>> {
    ports
        .iter()
        .zip(addrs)
        .map(|(port, &addr)| {
            Some(TensorInfo {
                dt: port.desc.dt(),
                format: port.desc.format(),
                shape: port.desc.shape().clone(),
                size: port.desc.nbytes()? as _,
                addr,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use crate::{DataDumper, DumpProperties};
    use digit_layout::types as dt;
    use exec::{Device, Exec};
    use graph::{ComputeGraph, OpDesc};
    use std::fs;
    use tensor::{Shape, TensorDesc};
    use test_rt::TestDevice;

    #[test]
    fn test_exception() {
        let dev = TestDevice::new();
        let g = ComputeGraph::new("model");
        let x = dev.alloc(8).unwrap();
        let y = dev.alloc(8).unwrap();
        dev.write(x, &[1; 8]);
        dev.write(y, &[2; 8]);

        let desc = TensorDesc::new(dt::F32, [2]);
        let exec = Exec {
            node: OpDesc::new("scope/neg", "Neg")
                .input("x", desc.clone())
                .output("y", desc),
            task_id: 3,
            stream_id: 1,
            inputs: [x].into(),
            outputs: [y].into(),
        };
        let unknown = Exec {
            node: OpDesc::new("cast", "Cast")
                .output("y", TensorDesc::new(dt::F32, Shape::UnknownRank)),
            task_id: 4,
            stream_id: 1,
            inputs: [].into(),
            outputs: [y].into(),
        };

        let mut dumper = DataDumper::new(&dev, &g, DumpProperties::new());
        dumper.save_op_desc_info(&exec);
        dumper.save_op_desc_info(&unknown);
        assert!(dumper.find_op_desc_info(3, 1).is_some());
        assert!(dumper.find_op_desc_info(4, 1).is_none());
        assert!(dumper.find_op_desc_info(3, 0).is_none());

        let dir = std::env::temp_dir().join(format!("dump-exception-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let files = dumper.dump_exception_info(&[(3, 1)], &dir).unwrap();
        assert!(dumper.dump_exception_info(&[(4, 1)], &dir).is_err());

        let [file] = &*files else { panic!() };
        let name = file.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Neg.scope_neg.3."));

        let content = fs::read(file).unwrap();
        let len = u64::from_le_bytes(content[..8].try_into().unwrap()) as usize;
        let head: crate::proto::DumpData = prost::Message::decode(&content[8..8 + len]).unwrap();
        assert_eq!(head.version, "2.0");
        assert_eq!(head.op_name, "scope/neg");
        assert_eq!(head.input[0].size, 8);
        assert_eq!(head.output[0].data_type, 1);
        assert_eq!(content[8 + len..], [[1; 8], [2; 8]].concat());

        fs::remove_dir_all(&dir).unwrap();
        drop(dumper);
        dev.free(x);
        dev.free(y);
        assert_eq!(dev.n_allocs(), 0);
    }
}
